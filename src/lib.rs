#![doc = include_str!("../README.md")]
use thiserror::Error;

mod buffer;
mod config;
mod dispatch;
mod engine;
mod filter;
mod line;
mod noding;
mod observer;
mod pixset;
mod poly;
mod progress;
mod raster;
mod select;
mod traverser;
mod vector;

pub use config::{
    BoxParams, BufferParams, DupPixelMode, GeometryTransform, NodataBands, ParamValue,
    TraversalOptions, VectorSelection,
};
pub use dispatch::Summary;
pub use engine::{GeoEngine, GeometryEngine, TopologyError};
pub use filter::AttributeFilter;
pub use line::{LineObserver, LineRasterizer};
pub use observer::{
    BandInfo, GlobalInfo, IntersectionInfo, Observer, RasterizeObserver, TraversalEvent,
};
pub use pixset::PixelVisitedSet;
pub use poly::{CellSink, GridRect, QuadStats, Quadtree};
pub use progress::{Progress, ProgressReporter};
pub use raster::{Grid, MemRaster, Raster, Transform};
pub use select::{RasterInfo, RasterSelector};
pub use traverser::{TraversalContext, Traverser};
pub use vector::{Feature, FieldValue, Layer, MemLayer, MemVector, Vector};

#[cfg(test)]
mod proptests;

/// 本库的错误类型
///
/// 配置错误（缺少矢量或栅格、栅格几何不一致、没有观察者等）会让整个遍历提前返回；
/// 单个要素处理中的错误只记录日志，遍历继续处理下一个要素。
#[derive(Error, Clone, Debug, PartialEq)]
pub enum ExtractError {
    /// 没有注册任何观察者
    #[error("没有注册任何观察者")]
    NoObservers,

    /// 没有指定矢量数据源
    #[error("没有指定矢量数据源")]
    NoVector,

    /// 没有指定任何栅格
    #[error("没有指定任何栅格数据集")]
    NoRasters,

    /// 栅格的行列数与第一个栅格不同
    #[error("栅格 `{raster}` 的行列数 {found:?} 与第一个栅格 {expected:?} 不同")]
    SizeMismatch {
        raster: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// 栅格的地理范围与第一个栅格不同
    #[error("栅格 `{raster}` 的地理范围 {found:?} 与第一个栅格 {expected:?} 不同")]
    LocationMismatch {
        raster: String,
        expected: [f64; 4],
        found: [f64; 4],
    },

    /// 栅格的像素尺寸与第一个栅格不同
    #[error("栅格 `{raster}` 的像素尺寸 {found:?} 与第一个栅格 {expected:?} 不同")]
    PixelSizeMismatch {
        raster: String,
        expected: (f64, f64),
        found: (f64, f64),
    },

    /// 找不到图层
    #[error("无法从 `{vector}` 获取图层 {layer}")]
    LayerNotFound { vector: String, layer: String },

    /// 找不到指定的要素
    #[error("在 `{vector}` 中找不到 FID {fid}")]
    FidNotFound { vector: String, fid: i64 },

    /// 要素上没有指定的属性字段
    #[error("找不到字段 `{0}`")]
    FieldNotFound(String),

    /// 无法解析的尺寸或参数值
    #[error("无效的参数值 `{0}`")]
    InvalidParameter(String),

    /// 无法解析的重复像素模式
    #[error("无效的重复像素模式 `{0}`")]
    InvalidDupPixelMode(String),

    /// 同时指定了矩形框和缓冲区两种预变换
    #[error("矩形框和缓冲区不能同时使用")]
    ConflictingTransforms,

    /// 像素比例不在 [0, 1] 之内
    #[error("像素比例 {0} 不在 [0, 1] 之内")]
    InvalidPixelProportion(f64),

    /// 波段编号超出范围（编号从1开始）
    #[error("波段编号 {band} 超出范围 1..={bands}")]
    BandOutOfRange { band: usize, bands: usize },

    /// 像素位置超出栅格范围
    #[error("像素 [{col}, {row}] 超出栅格范围")]
    PixelOutOfRange { col: i64, row: i64 },

    /// 栅格读写失败
    #[error("栅格 `{raster}` 读写失败: {message}")]
    RasterIo { raster: String, message: String },

    /// 无法构造栅格
    #[error("无效的栅格: {0}")]
    InvalidRaster(String),

    /// 属性过滤表达式语法错误
    #[error("属性过滤表达式错误: {0}")]
    FilterSyntax(String),

    /// 不支持的SQL语句或方言
    #[error("不支持的SQL: {0}")]
    UnsupportedSql(String),

    /// 几何引擎的拓扑错误
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// 本库使用的结果类型，使用[ExtractError]作为错误类型。
pub type Result<T> = std::result::Result<T, ExtractError>;
