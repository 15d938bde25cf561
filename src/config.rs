//! 遍历配置
//!
//! 所有选项都通过 [TraversalOptions] 显式传给遍历器和栅格选择器，没有进程级的全局状态。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{raster::Grid, vector::Feature, ExtractError, Result};

/// 打开调试输出：拓扑错误时以 WKT 输出相关几何
pub const ENV_DUMP_POLYS: &str = "GEO_EXTRACT_DUMP_POLYS";
/// 关闭遍历所有要素时按栅格范围进行的空间过滤
pub const ENV_NO_SPATIAL_FILTER: &str = "GEO_EXTRACT_NO_SPATIAL_FILTER";

/// 尺寸类参数的取值
///
/// 文本形式：
/// * `12.5` - 地理单位下的字面值
/// * `3px` - 像素数，乘以对应轴像素尺寸的绝对值
/// * `@width` - 取要素属性 `width` 的值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParamValue {
    Literal(f64),
    Pixels(f64),
    Field(String),
}

impl ParamValue {
    /// 计算参数在某个要素上的值
    ///
    /// # 参数
    /// * `feature` - 提供 `@field` 引用的属性
    /// * `pixel_size` - 对应轴的像素尺寸，只用于 `px` 后缀
    ///
    /// # 错误
    /// 要素缺少引用的字段时返回 [ExtractError::FieldNotFound]，
    /// 字段值不是数字时返回 [ExtractError::InvalidParameter]
    pub fn resolve(&self, feature: &Feature, pixel_size: f64) -> Result<f64> {
        match self {
            ParamValue::Literal(v) => Ok(*v),
            ParamValue::Pixels(v) => Ok(v * pixel_size.abs()),
            ParamValue::Field(name) => {
                let value = feature
                    .field(name)
                    .ok_or_else(|| ExtractError::FieldNotFound(name.clone()))?;
                value.as_f64().ok_or_else(|| {
                    ExtractError::InvalidParameter(format!("@{}={}", name, value.as_string()))
                })
            }
        }
    }
}

impl FromStr for ParamValue {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let invalid = || ExtractError::InvalidParameter(s.to_string());
        if let Some(field) = text.strip_prefix('@') {
            if field.is_empty() {
                return Err(invalid());
            }
            return Ok(ParamValue::Field(field.to_string()));
        }
        if let Some(number) = text.strip_suffix("px") {
            let v: f64 = number.trim_end().parse().map_err(|_| invalid())?;
            return Ok(ParamValue::Pixels(v));
        }
        text.parse().map(ParamValue::Literal).map_err(|_| invalid())
    }
}

impl TryFrom<String> for ParamValue {
    type Error = ExtractError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ParamValue> for String {
    fn from(value: ParamValue) -> String {
        value.to_string()
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Literal(v) => write!(f, "{}", v),
            ParamValue::Pixels(v) => write!(f, "{}px", v),
            ParamValue::Field(name) => write!(f, "@{}", name),
        }
    }
}

/// 以要素外包矩形中心为中心的固定尺寸矩形
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxParams {
    pub width: ParamValue,
    pub height: ParamValue,
}

impl BoxParams {
    /// 矩形在某个要素上的 `(宽, 高)`
    pub fn resolve(&self, feature: &Feature, grid: &Grid) -> Result<(f64, f64)> {
        Ok((
            self.width.resolve(feature, grid.pix_x_size)?,
            self.height.resolve(feature, grid.pix_y_size)?,
        ))
    }
}

/// 缓冲区参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferParams {
    pub distance: ParamValue,
    /// 每四分之一圆的分段数
    #[serde(default = "BufferParams::default_quadrant_segments")]
    pub quadrant_segments: ParamValue,
}

impl BufferParams {
    pub fn new(distance: ParamValue) -> Self {
        BufferParams {
            distance,
            quadrant_segments: Self::default_quadrant_segments(),
        }
    }

    fn default_quadrant_segments() -> ParamValue {
        ParamValue::Literal(1.)
    }

    /// 缓冲区在某个要素上的 `(距离, 分段数)`
    ///
    /// 分段数截断为整数，负数或非有限值是错误。
    pub fn resolve(&self, feature: &Feature, grid: &Grid) -> Result<(f64, u32)> {
        let distance = self.distance.resolve(feature, grid.pix_x_size)?;
        let segments = self.quadrant_segments.resolve(feature, grid.pix_x_size)?;
        if !segments.is_finite() || segments < 0. {
            return Err(ExtractError::InvalidParameter(format!(
                "quadrant_segments={}",
                segments
            )));
        }
        Ok((distance, segments.trunc() as u32))
    }
}

/// 求交之前对要素几何进行的预变换，两种变换互斥
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryTransform {
    Box(BoxParams),
    Buffer(BufferParams),
}

/// 检查无数据值时考虑哪些波段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodataBands {
    /// 所有波段都是无数据值才算无数据
    AllBands,
    /// 任一波段是无数据值就算无数据
    AnyBand,
    /// 只看指定的波段（从1开始）
    Band(usize),
}

/// 多个栅格重叠时选择栅格的规则
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DupPixelMode {
    /// 要素中心到栅格中心的方向与给定角度（度）最接近
    Direction(f64),
    /// 要素中心到栅格中心的距离最近
    Distance,
    /// 排除要素范围内含有无数据值的栅格
    IgnoreNodata(NodataBands),
}

impl FromStr for DupPixelMode {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ExtractError::InvalidDupPixelMode(s.to_string());
        let tokens: Vec<&str> = s.split_whitespace().collect();
        match tokens.as_slice() {
            ["direction", angle] => angle
                .parse()
                .map(DupPixelMode::Direction)
                .map_err(|_| invalid()),
            ["distance"] => Ok(DupPixelMode::Distance),
            ["ignore_nodata", "all_bands"] => Ok(DupPixelMode::IgnoreNodata(NodataBands::AllBands)),
            ["ignore_nodata", "any_band"] => Ok(DupPixelMode::IgnoreNodata(NodataBands::AnyBand)),
            ["ignore_nodata", "band", n] => match n.parse::<usize>() {
                Ok(band) if band > 0 => Ok(DupPixelMode::IgnoreNodata(NodataBands::Band(band))),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for DupPixelMode {
    type Error = ExtractError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DupPixelMode> for String {
    fn from(mode: DupPixelMode) -> String {
        mode.to_string()
    }
}

impl fmt::Display for DupPixelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DupPixelMode::Direction(angle) => write!(f, "direction {}", angle),
            DupPixelMode::Distance => write!(f, "distance"),
            DupPixelMode::IgnoreNodata(NodataBands::AllBands) => write!(f, "ignore_nodata all_bands"),
            DupPixelMode::IgnoreNodata(NodataBands::AnyBand) => write!(f, "ignore_nodata any_band"),
            DupPixelMode::IgnoreNodata(NodataBands::Band(n)) => write!(f, "ignore_nodata band {}", n),
        }
    }
}

/// 矢量要素的选择条件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSelection {
    /// 在数据源上执行的SQL，结果图层代替按编号选择的图层
    pub sql: Option<String>,
    /// 属性过滤条件
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    /// SQL方言
    pub dialect: Option<String>,
}

/// 遍历选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalOptions {
    /// 像素被计入所需的最小多边形覆盖比例，取值 `[0, 1]`
    pub pixel_proportion: f64,
    /// 直接跳过无效多边形，而不是尝试拆分
    pub skip_invalid_polys: bool,
    /// 求交之前的几何预变换
    pub transform: Option<GeometryTransform>,
    /// 无数据值
    pub nodata: f64,
    /// 多个栅格重叠时的选择规则，按顺序应用
    pub duplicate_pixel_modes: Vec<DupPixelMode>,
    pub selection: VectorSelection,
    /// 遍历结束后以日志输出汇总
    pub report_summary: bool,
    pub dump_polys_on_exception: bool,
    pub no_spatial_filter: bool,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        TraversalOptions {
            pixel_proportion: 0.5,
            skip_invalid_polys: false,
            transform: None,
            nodata: 0.,
            duplicate_pixel_modes: vec![],
            selection: VectorSelection::default(),
            report_summary: false,
            dump_polys_on_exception: false,
            no_spatial_filter: false,
        }
    }
}

impl TraversalOptions {
    /// 设置像素比例
    pub fn with_pixel_proportion(mut self, pixel_proportion: f64) -> Self {
        self.pixel_proportion = pixel_proportion;
        self
    }

    /// 设置预变换
    ///
    /// # 错误
    /// 同时给出矩形框和缓冲区参数时返回 [ExtractError::ConflictingTransforms]
    pub fn with_transform(
        mut self,
        box_params: Option<BoxParams>,
        buffer_params: Option<BufferParams>,
    ) -> Result<Self> {
        self.transform = match (box_params, buffer_params) {
            (Some(_), Some(_)) => return Err(ExtractError::ConflictingTransforms),
            (Some(b), None) => Some(GeometryTransform::Box(b)),
            (None, Some(b)) => Some(GeometryTransform::Buffer(b)),
            (None, None) => None,
        };
        Ok(self)
    }

    /// 根据环境变量打开调试选项
    pub fn with_env_overrides(mut self) -> Self {
        if std::env::var_os(ENV_DUMP_POLYS).is_some() {
            self.dump_polys_on_exception = true;
        }
        if std::env::var_os(ENV_NO_SPATIAL_FILTER).is_some() {
            self.no_spatial_filter = true;
        }
        self
    }

    /// 检查选项取值
    pub fn validate(&self) -> Result<()> {
        if !(0. ..=1.).contains(&self.pixel_proportion) {
            return Err(ExtractError::InvalidPixelProportion(self.pixel_proportion));
        }
        Ok(())
    }

    /// 第一个 `ignore_nodata` 规则
    pub fn nodata_policy(&self) -> Option<NodataBands> {
        self.duplicate_pixel_modes.iter().find_map(|mode| match mode {
            DupPixelMode::IgnoreNodata(bands) => Some(*bands),
            _ => None,
        })
    }
}
