/// 子像素精度：每个像素划分为 256 份（8 位小数）
const SUBPIXEL_SHIFT: u32 = 8;
/// 子像素缩放系数
const SUBPIXEL_SCALE: f64 = (1 << SUBPIXEL_SHIFT) as f64;

/// 接收线段栅格化结果的观察者
///
/// 每当线段经过一个新像素时调用 [LineObserver::pixel_found]，
/// 传入的 `(x, y)` 是对齐到像素网格的地理坐标（原点加上像素尺寸的整数倍），
/// 而不是线段上的原始子像素位置。
pub trait LineObserver {
    /// 发现一个像素
    fn pixel_found(&mut self, x: f64, y: f64);
}

/// 将用户坐标转换为 8 位子像素精度的整数坐标
#[inline]
fn to_subpixel(v: f64, size: f64) -> i64 {
    (SUBPIXEL_SCALE * (v / size)).round_ties_even() as i64
}

/// 子像素坐标降为像素坐标（算术右移，即向下取整）
#[inline]
fn line_lr(v: i64) -> i64 {
    v >> SUBPIXEL_SHIFT
}

/// 带误差累加器的整数DDA插值器
///
/// 在 `count` 步内把 `y1` 均匀地插值到 `y2`，
/// 每一步的增量为整数商，余数通过累加器分配，最后一步恰好落在 `y2` 上。
#[derive(Debug, Clone, Copy)]
struct Dda2Interpolator {
    cnt: i64,
    lft: i64,
    rem: i64,
    modulo: i64,
    y: i64,
}

impl Dda2Interpolator {
    fn new(y1: i64, y2: i64, count: i64) -> Self {
        let cnt = if count <= 0 { 1 } else { count };
        let mut lft = (y2 - y1) / cnt;
        let mut rem = (y2 - y1) % cnt;
        let mut modulo = rem;
        if modulo <= 0 {
            modulo += cnt;
            rem += cnt;
            lft -= 1;
        }
        modulo -= cnt;
        Dda2Interpolator {
            cnt,
            lft,
            rem,
            modulo,
            y: y1,
        }
    }

    fn step(&mut self) {
        self.modulo += self.rem;
        self.y += self.lft;
        if self.modulo > 0 {
            self.modulo -= self.cnt;
            self.y += 1;
        }
    }

    fn y(&self) -> i64 {
        self.y
    }
}

/// Bresenham 风格的子像素插值器
///
/// 沿主轴（像素坐标差较大的轴）每次前进一个像素，
/// 次轴坐标由 [Dda2Interpolator] 在子像素精度下按比例累加得到。
#[derive(Debug, Clone, Copy)]
struct BresenhamInterpolator {
    x1_lr: i64,
    y1_lr: i64,
    ver: bool,
    len: u64,
    inc: i64,
    interpolator: Dda2Interpolator,
}

impl BresenhamInterpolator {
    fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        let x1_lr = line_lr(x1);
        let y1_lr = line_lr(y1);
        let x2_lr = line_lr(x2);
        let y2_lr = line_lr(y2);
        let ver = (x2_lr - x1_lr).abs() < (y2_lr - y1_lr).abs();
        let len = if ver {
            (y2_lr - y1_lr).unsigned_abs()
        } else {
            (x2_lr - x1_lr).unsigned_abs()
        };
        let inc = if ver {
            if y2 > y1 {
                1
            } else {
                -1
            }
        } else if x2 > x1 {
            1
        } else {
            -1
        };
        let interpolator = if ver {
            Dda2Interpolator::new(x1, x2, len as i64)
        } else {
            Dda2Interpolator::new(y1, y2, len as i64)
        };
        BresenhamInterpolator {
            x1_lr,
            y1_lr,
            ver,
            len,
            inc,
            interpolator,
        }
    }

    fn hstep(&mut self) {
        self.interpolator.step();
        self.x1_lr += self.inc;
    }

    fn vstep(&mut self) {
        self.interpolator.step();
        self.y1_lr += self.inc;
    }

    /// 主轴为 y 时的次轴像素坐标
    fn x2(&self) -> i64 {
        line_lr(self.interpolator.y())
    }

    /// 主轴为 x 时的次轴像素坐标
    fn y2(&self) -> i64 {
        line_lr(self.interpolator.y())
    }
}

/// 子像素精度的线段栅格化器
///
/// 栅格由原点 `(x0, y0)` 和每个轴上带符号的像素尺寸描述，
/// 尺寸的符号表示轴的方向（北向上的栅格 y 方向尺寸通常为负）。
/// 栅格化器本身不保存任何跨调用的状态。
///
/// # 示例
///
/// ```rust
/// use geo_extract::{LineObserver, LineRasterizer};
///
/// struct Collect(Vec<(f64, f64)>);
/// impl LineObserver for Collect {
///     fn pixel_found(&mut self, x: f64, y: f64) {
///         self.0.push((x, y));
///     }
/// }
///
/// let rasterizer = LineRasterizer::new(0.0, 0.0, 1.0, 1.0);
/// let mut pixels = Collect(vec![]);
/// rasterizer.line(0.5, 0.5, 3.5, 0.5, true, &mut pixels);
/// assert_eq!(pixels.0, vec![(0., 0.), (1., 0.), (2., 0.), (3., 0.)]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineRasterizer {
    x0: f64,
    y0: f64,
    pixel_size_x: f64,
    pixel_size_y: f64,
}

impl LineRasterizer {
    /// 创建线段栅格化器
    ///
    /// # 参数
    /// * `x0`, `y0` - 栅格原点
    /// * `pixel_size_x`, `pixel_size_y` - 带符号的像素尺寸
    pub fn new(x0: f64, y0: f64, pixel_size_x: f64, pixel_size_y: f64) -> Self {
        LineRasterizer {
            x0,
            y0,
            pixel_size_x,
            pixel_size_y,
        }
    }

    /// 子像素坐标对应像素的网格对齐地理坐标
    fn to_user(&self, x_lr: i64, y_lr: i64) -> (f64, f64) {
        (
            self.x0 + x_lr as f64 * self.pixel_size_x,
            self.y0 + y_lr as f64 * self.pixel_size_y,
        )
    }

    /// 栅格化 `(x1, y1)` 到 `(x2, y2)` 之间的线段
    ///
    /// 按从起点到终点的顺序对每个经过的像素调用 `observer.pixel_found`。
    ///
    /// # 参数
    /// * `last` - 是否同时报告终点所在的像素。
    ///   线串中相邻线段共享端点，只有最后一段应传入 `true`，
    ///   这样共享的端点像素不会被重复报告。
    ///   两端点落在同一像素内时，`last` 为 `true` 恰好报告一个像素，否则不报告。
    pub fn line<O>(&self, x1: f64, y1: f64, x2: f64, y2: f64, last: bool, observer: &mut O)
    where
        O: LineObserver + ?Sized,
    {
        let x1 = to_subpixel(x1 - self.x0, self.pixel_size_x);
        let y1 = to_subpixel(y1 - self.y0, self.pixel_size_y);
        let x2 = to_subpixel(x2 - self.x0, self.pixel_size_x);
        let y2 = to_subpixel(y2 - self.y0, self.pixel_size_y);

        let mut li = BresenhamInterpolator::new(x1, y1, x2, y2);

        let mut len = li.len;
        if len == 0 {
            if last {
                let (x, y) = self.to_user(line_lr(x1), line_lr(y1));
                observer.pixel_found(x, y);
            }
            return;
        }

        if last {
            len += 1;
        }

        if li.ver {
            for _ in 0..len {
                let (x, y) = self.to_user(li.x2(), li.y1_lr);
                observer.pixel_found(x, y);
                li.vstep();
            }
        } else {
            for _ in 0..len {
                let (x, y) = self.to_user(li.x1_lr, li.y2());
                observer.pixel_found(x, y);
                li.hstep();
            }
        }
    }
}
