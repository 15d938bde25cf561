use geo::{Geometry, Rect};
use ndarray::Array2;
use num_traits::NumCast;

use crate::{
    pixset::PixelVisitedSet,
    raster::{Grid, Raster},
    vector::Feature,
    ExtractError, Result,
};

/// 一个波段的来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandInfo {
    /// 栅格在遍历器中的序号（从0开始）
    pub raster: usize,
    /// 栅格内的波段编号（从1开始）
    pub band: usize,
    pub raster_name: String,
}

/// 遍历开始时传给观察者的全局信息
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalInfo {
    /// 所有栅格的所有波段，按添加顺序排列
    pub bands: Vec<BandInfo>,
    /// 栅格覆盖的地理范围
    pub raster_envelope: Rect<f64>,
    pub width: usize,
    pub height: usize,
    pub grid: Grid,
    /// 被遍历的图层名称
    pub layer_name: String,
}

/// 单个像素事件
///
/// `band_values` 指向遍历器复用的缓冲区，只在回调期间有效，
/// 需要保留的观察者必须自行复制。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraversalEvent<'e> {
    pub col: i64,
    pub row: i64,
    /// 像素在网格上的地理坐标
    pub x: f64,
    pub y: f64,
    /// 所有波段在该像素的值；所有观察者都是简单观察者时为 `None`
    pub band_values: Option<&'e [f64]>,
}

/// 要素与栅格相交的信息
pub struct IntersectionInfo<'i> {
    pub feature: &'i Feature,
    /// 与栅格求交的几何（可能经过矩形框或缓冲区预变换）
    pub geometry_to_intersect: &'i Geometry<f64>,
    /// 与栅格范围的交集
    pub intersection: &'i Geometry<f64>,
    pub(crate) visited: &'i PixelVisitedSet,
    pub(crate) rasters: &'i [&'i dyn Raster],
    pub(crate) grid: &'i Grid,
}

impl<'i> IntersectionInfo<'i> {
    /// 当前要素已报告的像素
    ///
    /// 在 [Observer::intersection_found] 中为空，在 [Observer::intersection_end] 中是完整的。
    pub fn visited(&self) -> &PixelVisitedSet {
        self.visited
    }

    /// 全局波段编号（从1开始，跨所有栅格计数）对应的栅格和栅格内波段编号
    fn locate_band(&self, band: usize) -> Result<(&'i dyn Raster, usize)> {
        let total: usize = self.rasters.iter().map(|r| r.size().2).sum();
        if band == 0 || band > total {
            return Err(ExtractError::BandOutOfRange { band, bands: total });
        }
        let mut local = band;
        for raster in self.rasters.iter() {
            let bands = raster.size().2;
            if local <= bands {
                return Ok((*raster, local));
            }
            local -= bands;
        }
        Err(ExtractError::BandOutOfRange { band, bands: total })
    }

    /// 已访问像素在某个波段上的值，按像素 `(col, row)` 顺序排列
    ///
    /// 网格之外的像素取值为0。
    ///
    /// # 错误
    /// 波段编号超出范围时返回 [ExtractError::BandOutOfRange]
    pub fn pixel_values_in_band(&self, band: usize) -> Result<Vec<f64>> {
        let (raster, local) = self.locate_band(band)?;
        self.visited
            .iter()
            .map(|(col, row)| {
                if !self.grid.contains_cell(col, row) {
                    return Ok(0.);
                }
                raster
                    .band_value(local, col, row)
                    .ok_or_else(|| ExtractError::RasterIo {
                        raster: raster.name().to_string(),
                        message: format!("无法读取波段 {} 的像素 [{}, {}]", local, col, row),
                    })
            })
            .collect()
    }

    /// 与 [IntersectionInfo::pixel_values_in_band] 相同，但取值四舍五入为整数
    pub fn pixel_int_values_in_band(&self, band: usize) -> Result<Vec<i64>> {
        Ok(self
            .pixel_values_in_band(band)?
            .into_iter()
            .map(|v| v.round() as i64)
            .collect())
    }
}

/// 遍历事件的观察者
///
/// 遍历器依次调用：一次 [Observer::init]；对每个与栅格相交的要素调用
/// [Observer::intersection_found]、若干次 [Observer::add_pixel] 和
/// [Observer::intersection_end]；最后一次 [Observer::end]。
pub trait Observer {
    /// 只关心像素位置、不需要波段值的观察者返回 `true`
    ///
    /// 所有观察者都是简单观察者时，遍历器不读取波段值。
    fn is_simple(&self) -> bool {
        false
    }

    fn init(&mut self, _info: &GlobalInfo) {}

    fn intersection_found(&mut self, _info: &IntersectionInfo<'_>) {}

    fn add_pixel(&mut self, _event: &TraversalEvent<'_>) {}

    fn intersection_end(&mut self, _info: &IntersectionInfo<'_>) {}

    fn end(&mut self) {}
}

/// 把相交像素烧录为固定值的观察者
///
/// 输出数组的形状为 `(height, width)`，在 [Observer::init] 时创建，
/// 未被任何要素覆盖的像素保留初始值。
///
/// # 示例
///
/// ```rust
/// # fn main() -> geo_extract::Result<()> {
/// use geo::polygon;
/// use geo_extract::{Feature, MemLayer, MemRaster, RasterizeObserver, Traverser};
/// use ndarray::array;
///
/// let raster = MemRaster::new("base", (3, 2, 1), (0., 0.), (1., 1.), 0u8);
/// let square = polygon![(x: 0., y: 0.), (x: 2., y: 0.), (x: 2., y: 1.), (x: 0., y: 1.), (x: 0., y: 0.)];
/// let mut layer = MemLayer::from_features("plots", vec![Feature::new(0, Some(square.into()))]);
/// let mut burn = RasterizeObserver::new(1u8, 0u8);
/// {
///     let mut traverser = Traverser::new();
///     traverser.set_layer(&mut layer);
///     traverser.add_raster(&raster)?;
///     traverser.add_observer(&mut burn);
///     traverser.traverse()?;
/// }
/// assert_eq!(burn.finish(), Some(array![[1, 1, 0], [0, 0, 0]]));
/// # Ok(())}
/// ```
#[derive(Debug, Clone)]
pub struct RasterizeObserver<T> {
    value: T,
    fill: T,
    output: Option<Array2<T>>,
}

impl<T> RasterizeObserver<T>
where
    T: Copy + NumCast,
{
    /// # 参数
    /// * `value` - 烧录到相交像素的值
    /// * `fill` - 其余像素的初始值（通常是无数据值）
    pub fn new(value: T, fill: T) -> Self {
        RasterizeObserver {
            value,
            fill,
            output: None,
        }
    }

    /// 取出烧录结果，遍历尚未开始时返回 `None`
    pub fn finish(self) -> Option<Array2<T>> {
        self.output
    }
}

impl<T> Observer for RasterizeObserver<T>
where
    T: Copy + NumCast,
{
    fn is_simple(&self) -> bool {
        true
    }

    fn init(&mut self, info: &GlobalInfo) {
        self.output = Some(Array2::from_elem((info.height, info.width), self.fill));
    }

    fn add_pixel(&mut self, event: &TraversalEvent<'_>) {
        if let Some(output) = self.output.as_mut() {
            if let Some(cell) = output.get_mut((event.row as usize, event.col as usize)) {
                *cell = self.value;
            }
        }
    }
}
