use euclid::{Transform2D, UnknownUnit};
use geo::{Coord, Polygon, Rect};
use ndarray::{s, stack, Array2, Array3, ArrayView2, Axis};
use num_traits::NumCast;

use crate::{ExtractError, Result};

/// 仿射变换，描述如何将像素坐标 `(col, row)` 转换为地理坐标。
pub type Transform = Transform2D<f64, UnknownUnit, UnknownUnit>;
type EuclidPoint = euclid::Point2D<f64, UnknownUnit>;

/// 浮点坐标换算为行列号时，距离像素边界在此范围内的值被视为落在边界上
const GRID_EPSILON: f64 = 1e-9;

/// 栅格网格的几何描述
///
/// 由原点 `(x0, y0)`、带符号的像素尺寸和以像素为单位的宽高组成，
/// 像素 `(col, row)` 的位置为 `x0 + col * pix_x_size, y0 + row * pix_y_size`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    pub width: usize,
    pub height: usize,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub pix_x_size: f64,
    pub pix_y_size: f64,
}

impl Grid {
    /// 根据宽高、原点和像素尺寸创建网格
    pub fn new(width: usize, height: usize, origin: (f64, f64), pixel_size: (f64, f64)) -> Self {
        let (x0, y0) = origin;
        let (pix_x_size, pix_y_size) = pixel_size;
        Grid {
            width,
            height,
            x0,
            y0,
            x1: x0 + width as f64 * pix_x_size,
            y1: y0 + height as f64 * pix_y_size,
            pix_x_size,
            pix_y_size,
        }
    }

    /// 读取栅格的网格描述
    pub fn of<R: Raster + ?Sized>(raster: &R) -> Self {
        let (width, height, _) = raster.size();
        let (x0, y0, x1, y1) = raster.coordinates();
        let (pix_x_size, pix_y_size) = raster.pixel_size();
        Grid {
            width,
            height,
            x0,
            y0,
            x1,
            y1,
            pix_x_size,
            pix_y_size,
        }
    }

    /// 单个像素的面积（绝对值）
    pub fn pixel_area(&self) -> f64 {
        (self.pix_x_size * self.pix_y_size).abs()
    }

    /// 网格覆盖的地理范围
    pub fn envelope(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.x0,
                y: self.y0,
            },
            Coord {
                x: self.x1,
                y: self.y1,
            },
        )
    }

    /// 网格覆盖范围对应的多边形
    pub fn polygon(&self) -> Polygon<f64> {
        self.envelope().to_polygon()
    }

    /// 像素坐标到地理坐标的仿射变换
    pub fn pix_to_geo(&self) -> Transform {
        Transform::new(self.pix_x_size, 0., 0., self.pix_y_size, self.x0, self.y0)
    }

    /// 地理坐标 `(x, y)` 所在像素的行列号
    ///
    /// 结果可能落在网格之外，调用者需要自行检查。
    pub fn to_col_row(&self, x: f64, y: f64) -> (i64, i64) {
        (
            snap_floor((x - self.x0) / self.pix_x_size),
            snap_floor((y - self.y0) / self.pix_y_size),
        )
    }

    /// 像素 `(col, row)` 的网格对齐地理坐标
    pub fn to_grid_xy(&self, col: i64, row: i64) -> (f64, f64) {
        self.pix_to_geo()
            .transform_point(EuclidPoint::new(col as f64, row as f64))
            .to_tuple()
    }

    /// 像素是否位于网格之内
    pub fn contains_cell(&self, col: i64, row: i64) -> bool {
        col >= 0 && row >= 0 && (col as u64) < self.width as u64 && (row as u64) < self.height as u64
    }

    /// 检查另一个网格是否与本网格完全一致（严格相等）
    ///
    /// # 错误
    /// 行列数、地理范围或像素尺寸任一不同都会返回相应的错误
    pub fn check_same(&self, other: &Grid, raster: &str) -> Result<()> {
        if other.width != self.width || other.height != self.height {
            return Err(ExtractError::SizeMismatch {
                raster: raster.to_string(),
                expected: (self.width, self.height),
                found: (other.width, other.height),
            });
        }
        if other.x0 != self.x0 || other.y0 != self.y0 || other.x1 != self.x1 || other.y1 != self.y1
        {
            return Err(ExtractError::LocationMismatch {
                raster: raster.to_string(),
                expected: [self.x0, self.y0, self.x1, self.y1],
                found: [other.x0, other.y0, other.x1, other.y1],
            });
        }
        if other.pix_x_size != self.pix_x_size || other.pix_y_size != self.pix_y_size {
            return Err(ExtractError::PixelSizeMismatch {
                raster: raster.to_string(),
                expected: (self.pix_x_size, self.pix_y_size),
                found: (other.pix_x_size, other.pix_y_size),
            });
        }
        Ok(())
    }
}

/// 向下取整，但把与整数相差不超过 [GRID_EPSILON] 的值视为该整数
fn snap_floor(v: f64) -> i64 {
    let nearest = v.round();
    if (v - nearest).abs() <= GRID_EPSILON {
        nearest as i64
    } else {
        v.floor() as i64
    }
}

/// 栅格数据源
///
/// 遍历器只通过这个接口访问栅格：网格尺寸、地理范围、像素尺寸和逐像素读写。
/// 波段编号与GDAL保持一致，从1开始。
pub trait Raster {
    /// 栅格名称（通常是文件名）
    fn name(&self) -> &str;

    /// `(width, height, bands)`
    fn size(&self) -> (usize, usize, usize);

    /// 地理范围 `(x0, y0, x1, y1)`，其中 `(x0, y0)` 是像素 `(0, 0)` 的角点
    fn coordinates(&self) -> (f64, f64, f64, f64);

    /// 带符号的像素尺寸 `(pix_x_size, pix_y_size)`
    fn pixel_size(&self) -> (f64, f64);

    /// 读取单个波段在 `(col, row)` 处的值，超出范围时返回 `None`
    fn band_value(&self, band: usize, col: i64, row: i64) -> Option<f64>;

    /// 把所有波段在 `(col, row)` 处的值依次写入 `values`
    ///
    /// # 错误
    /// 像素超出范围时返回 [ExtractError::PixelOutOfRange]
    fn read_pixel(&self, col: i64, row: i64, values: &mut [f64]) -> Result<()> {
        let (_, _, bands) = self.size();
        for (band, value) in (1..=bands).zip(values.iter_mut()) {
            *value = self
                .band_value(band, col, row)
                .ok_or(ExtractError::PixelOutOfRange { col, row })?;
        }
        Ok(())
    }

    /// 把 `values` 依次写入所有波段的 `(col, row)` 处
    fn write_pixel(&mut self, col: i64, row: i64, values: &[f64]) -> Result<()>;

    /// 栅格的网格描述
    fn grid(&self) -> Grid {
        Grid::of(self)
    }
}

/// 基于 [ndarray] 的内存栅格
///
/// 波段数据存储为形状为 `(bands, height, width)` 的三维数组，
/// 像元类型可以是任何能与 `f64` 相互转换的数值类型。
///
/// # 示例
///
/// ```rust
/// # fn main() -> geo_extract::Result<()> {
/// use geo_extract::{MemRaster, Raster};
/// use ndarray::array;
///
/// let raster = MemRaster::from_band("dem", array![[1u8, 2], [3, 4]], (0., 2.), (1., -1.));
/// assert_eq!(raster.size(), (2, 2, 1));
/// assert_eq!(raster.band_value(1, 1, 0), Some(2.));
/// assert_eq!(raster.band_value(1, 2, 0), None);
/// # Ok(())}
/// ```
#[derive(Debug, Clone)]
pub struct MemRaster<T> {
    name: String,
    data: Array3<T>,
    origin: (f64, f64),
    pixel_size: (f64, f64),
}

impl<T> MemRaster<T>
where
    T: Copy + NumCast,
{
    /// 创建所有像元都等于 `fill` 的内存栅格
    ///
    /// # 参数
    /// * `name` - 栅格名称
    /// * `width`, `height`, `bands` - 栅格尺寸
    /// * `origin` - 像素 `(0, 0)` 角点的地理坐标
    /// * `pixel_size` - 带符号的像素尺寸
    /// * `fill` - 初始值
    pub fn new(
        name: impl Into<String>,
        (width, height, bands): (usize, usize, usize),
        origin: (f64, f64),
        pixel_size: (f64, f64),
        fill: T,
    ) -> Self {
        MemRaster {
            name: name.into(),
            data: Array3::from_elem((bands, height, width), fill),
            origin,
            pixel_size,
        }
    }

    /// 由单个波段创建内存栅格，数组形状为 `(height, width)`
    pub fn from_band(
        name: impl Into<String>,
        band: Array2<T>,
        origin: (f64, f64),
        pixel_size: (f64, f64),
    ) -> Self {
        MemRaster {
            name: name.into(),
            data: band.insert_axis(Axis(0)),
            origin,
            pixel_size,
        }
    }

    /// 由多个形状相同的波段创建内存栅格
    ///
    /// # 错误
    /// 没有波段或波段形状不一致时返回 [ExtractError::InvalidRaster]
    pub fn from_bands(
        name: impl Into<String>,
        bands: &[Array2<T>],
        origin: (f64, f64),
        pixel_size: (f64, f64),
    ) -> Result<Self> {
        let views: Vec<ArrayView2<'_, T>> = bands.iter().map(|band| band.view()).collect();
        let data =
            stack(Axis(0), &views).map_err(|e| ExtractError::InvalidRaster(e.to_string()))?;
        Ok(MemRaster {
            name: name.into(),
            data,
            origin,
            pixel_size,
        })
    }

    /// 单个波段的只读视图（编号从1开始）
    pub fn band(&self, band: usize) -> Option<ArrayView2<'_, T>> {
        if band == 0 || band > self.data.shape()[0] {
            return None;
        }
        Some(self.data.slice(s![band - 1, .., ..]))
    }

    /// 设置单个像元的值
    pub fn set(&mut self, band: usize, col: i64, row: i64, value: T) -> Result<()> {
        let (b, c, r) = self.index(band, col, row)?;
        self.data[[b, r, c]] = value;
        Ok(())
    }

    fn index(&self, band: usize, col: i64, row: i64) -> Result<(usize, usize, usize)> {
        let shape = self.data.shape();
        if band == 0 || band > shape[0] {
            return Err(ExtractError::BandOutOfRange {
                band,
                bands: shape[0],
            });
        }
        if col < 0 || row < 0 || col as usize >= shape[2] || row as usize >= shape[1] {
            return Err(ExtractError::PixelOutOfRange { col, row });
        }
        Ok((band - 1, col as usize, row as usize))
    }
}

impl<T> Raster for MemRaster<T>
where
    T: Copy + NumCast,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> (usize, usize, usize) {
        let shape = self.data.shape();
        (shape[2], shape[1], shape[0])
    }

    fn coordinates(&self) -> (f64, f64, f64, f64) {
        let (width, height, _) = self.size();
        let (x0, y0) = self.origin;
        let (sx, sy) = self.pixel_size;
        (x0, y0, x0 + width as f64 * sx, y0 + height as f64 * sy)
    }

    fn pixel_size(&self) -> (f64, f64) {
        self.pixel_size
    }

    fn band_value(&self, band: usize, col: i64, row: i64) -> Option<f64> {
        let (b, c, r) = self.index(band, col, row).ok()?;
        num_traits::cast(self.data[[b, r, c]])
    }

    fn write_pixel(&mut self, col: i64, row: i64, values: &[f64]) -> Result<()> {
        for (band, &value) in (1..=self.data.shape()[0]).zip(values) {
            let (b, c, r) = self.index(band, col, row)?;
            let sample: T = NumCast::from(value).ok_or_else(|| ExtractError::RasterIo {
                raster: self.name.clone(),
                message: format!("值 {} 无法转换为像元类型", value),
            })?;
            self.data[[b, r, c]] = sample;
        }
        Ok(())
    }
}
