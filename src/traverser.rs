use geo::{Coord, Geometry, Rect};
use log::{debug, error, info, trace, warn};

use crate::{
    config::{GeometryTransform, TraversalOptions},
    dispatch::{Dispatcher, Summary},
    engine::{GeoEngine, GeometryEngine},
    line::{LineObserver, LineRasterizer},
    observer::{BandInfo, GlobalInfo, IntersectionInfo, Observer, TraversalEvent},
    pixset::PixelVisitedSet,
    poly::{geometry_type, CellSink, Quadtree},
    progress::Progress,
    raster::{Grid, Raster},
    vector::{Feature, Layer, Vector},
    ExtractError, Result,
};

/// 单次遍历的上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalContext {
    /// 开始遍历前是否把图层的读取位置重置到第一个要素
    ///
    /// 嵌套在另一次图层迭代中的遍历应设为 `false`，以免打乱外层的读取位置。
    pub reset_reading: bool,
}

impl Default for TraversalContext {
    fn default() -> Self {
        TraversalContext {
            reset_reading: true,
        }
    }
}

/// 要素来源：数据源中的某个图层，或者直接给定的图层
enum Source<'a> {
    None,
    Vector {
        vector: &'a mut dyn Vector,
        layer: usize,
    },
    Layer(&'a mut dyn Layer),
}

/// 像素接收者：检查范围和重复，读取波段值并通知观察者
struct PixelSink<'s, 'a> {
    grid: &'s Grid,
    visited: &'s mut PixelVisitedSet,
    observers: &'s mut [&'a mut dyn Observer],
    rasters: &'s [&'a dyn Raster],
    band_values: &'s mut [f64],
    read_bands: bool,
    processed: usize,
    error: Option<ExtractError>,
}

impl PixelSink<'_, '_> {
    fn pixel(&mut self, col: i64, row: i64) {
        if self.error.is_some() || !self.grid.contains_cell(col, row) {
            return;
        }
        if self.visited.contains(col, row) {
            return;
        }
        if self.read_bands {
            if let Err(e) = read_bands(self.rasters, col, row, self.band_values) {
                self.error = Some(e);
                return;
            }
        }
        self.visited.insert(col, row);
        let (x, y) = self.grid.to_grid_xy(col, row);
        self.processed += 1;

        let event = TraversalEvent {
            col,
            row,
            x,
            y,
            band_values: self.read_bands.then_some(&*self.band_values),
        };
        for observer in self.observers.iter_mut() {
            observer.add_pixel(&event);
        }
    }
}

impl LineObserver for PixelSink<'_, '_> {
    fn pixel_found(&mut self, x: f64, y: f64) {
        let (col, row) = self.grid.to_col_row(x, y);
        self.pixel(col, row);
    }
}

impl CellSink for PixelSink<'_, '_> {
    fn cell_found(&mut self, col: i64, row: i64) {
        self.pixel(col, row);
    }
}

/// 依次读取所有栅格所有波段在 `(col, row)` 处的值
fn read_bands(rasters: &[&dyn Raster], col: i64, row: i64, values: &mut [f64]) -> Result<()> {
    let mut offset = 0;
    for raster in rasters {
        let bands = raster.size().2;
        raster
            .read_pixel(col, row, &mut values[offset..offset + bands])
            .map_err(|e| match e {
                e @ ExtractError::RasterIo { .. } => e,
                other => ExtractError::RasterIo {
                    raster: raster.name().to_string(),
                    message: other.to_string(),
                },
            })?;
        offset += bands;
    }
    Ok(())
}

/// 矢量要素与栅格的遍历器
///
/// 对图层中的每个要素：按配置做矩形框或缓冲区预变换，与栅格范围求交，
/// 清空已访问像素集合，再按交集类型找出覆盖的像素并通知所有观察者。
/// 所有栅格必须有完全相同的行列数、地理范围和像素尺寸。
///
/// # 示例
///
/// ```rust
/// # fn main() -> geo_extract::Result<()> {
/// use geo::line_string;
/// use geo_extract::{
///     Feature, MemLayer, MemRaster, Observer, TraversalEvent, Traverser,
/// };
/// use ndarray::array;
///
/// #[derive(Default)]
/// struct Values(Vec<f64>);
/// impl Observer for Values {
///     fn add_pixel(&mut self, event: &TraversalEvent<'_>) {
///         self.0.extend_from_slice(event.band_values.unwrap_or(&[]));
///     }
/// }
///
/// let raster = MemRaster::from_band("dem", array![[1u16, 2, 3], [4, 5, 6]], (0., 2.), (1., -1.));
/// let line = line_string![(x: 0.5, y: 1.5), (x: 2.5, y: 1.5)];
/// let mut layer = MemLayer::from_features("roads", vec![Feature::new(0, Some(line.into()))]);
/// let mut values = Values::default();
/// let mut traverser = Traverser::new();
/// traverser.set_layer(&mut layer);
/// traverser.add_raster(&raster)?;
/// traverser.add_observer(&mut values);
/// traverser.traverse()?;
/// assert_eq!(traverser.summary().num_processed_pixels, 3);
/// drop(traverser);
/// assert_eq!(values.0, vec![1., 2., 3.]);
/// # Ok(())}
/// ```
pub struct Traverser<'a, E: GeometryEngine = GeoEngine> {
    engine: E,
    options: TraversalOptions,
    source: Source<'a>,
    rasters: Vec<&'a dyn Raster>,
    observers: Vec<&'a mut dyn Observer>,
    not_simple: bool,
    progress: Option<&'a mut dyn Progress>,
    desired_fid: Option<i64>,
    desired_field: Option<(String, String)>,
    grid: Option<Grid>,
    bands: Vec<BandInfo>,
    pixset: PixelVisitedSet,
    band_values: Vec<f64>,
    summary: Summary,
}

impl<'a> Traverser<'a, GeoEngine> {
    /// 使用默认选项和 [GeoEngine] 创建遍历器
    pub fn new() -> Self {
        Traverser::with_engine(GeoEngine, TraversalOptions::default())
    }

    pub fn with_options(options: TraversalOptions) -> Self {
        Traverser::with_engine(GeoEngine, options)
    }
}

impl Default for Traverser<'_, GeoEngine> {
    fn default() -> Self {
        Traverser::new()
    }
}

impl<'a, E: GeometryEngine> Traverser<'a, E> {
    /// 使用指定的几何引擎创建遍历器
    pub fn with_engine(engine: E, options: TraversalOptions) -> Self {
        Traverser {
            engine,
            options,
            source: Source::None,
            rasters: vec![],
            observers: vec![],
            not_simple: false,
            progress: None,
            desired_fid: None,
            desired_field: None,
            grid: None,
            bands: vec![],
            pixset: PixelVisitedSet::new(),
            band_values: vec![],
            summary: Summary::default(),
        }
    }

    pub fn options(&self) -> &TraversalOptions {
        &self.options
    }

    /// 设置矢量数据源和要遍历的图层编号
    pub fn set_vector(&mut self, vector: &'a mut dyn Vector, layer: usize) {
        if !matches!(self.source, Source::None) {
            warn!("重新设置矢量数据源");
        }
        self.source = Source::Vector { vector, layer };
    }

    /// 直接遍历给定的图层
    ///
    /// 此时选项中的SQL语句被忽略，属性过滤条件仍然生效。
    pub fn set_layer(&mut self, layer: &'a mut dyn Layer) {
        if !matches!(self.source, Source::None) {
            warn!("重新设置矢量数据源");
        }
        self.source = Source::Layer(layer);
    }

    /// 添加栅格
    ///
    /// 第一个栅格决定网格；之后添加的栅格必须与它完全一致。
    ///
    /// # 错误
    /// 行列数、地理范围或像素尺寸与第一个栅格不同时返回相应的错误，栅格不会被添加
    pub fn add_raster(&mut self, raster: &'a dyn Raster) -> Result<()> {
        let grid = raster.grid();
        match &self.grid {
            Some(first) => {
                if let Err(e) = first.check_same(&grid, raster.name()) {
                    error!("{}", e);
                    return Err(e);
                }
            }
            None => self.grid = Some(grid),
        }
        let index = self.rasters.len();
        let (_, _, bands) = raster.size();
        self.bands.extend((1..=bands).map(|band| BandInfo {
            raster: index,
            band,
            raster_name: raster.name().to_string(),
        }));
        self.rasters.push(raster);
        Ok(())
    }

    /// 移除所有栅格，同时清空汇总
    pub fn remove_rasters(&mut self) {
        self.rasters.clear();
        self.bands.clear();
        self.grid = None;
        self.summary = Summary::default();
    }

    pub fn num_rasters(&self) -> usize {
        self.rasters.len()
    }

    /// 所有栅格的波段总数
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// 第一个栅格的网格
    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    pub fn add_observer(&mut self, observer: &'a mut dyn Observer) {
        if !observer.is_simple() {
            self.not_simple = true;
        }
        self.observers.push(observer);
    }

    pub fn set_progress(&mut self, progress: &'a mut dyn Progress) {
        self.progress = Some(progress);
    }

    /// 只处理指定 FID 的要素
    pub fn set_desired_fid(&mut self, fid: i64) {
        self.desired_fid = Some(fid);
    }

    /// 只处理第一个字段 `name` 的值等于 `value` 的要素
    pub fn set_desired_feature_by_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.desired_field = Some((name.into(), value.into()));
    }

    /// 最近一次遍历的汇总
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// 以日志输出汇总
    pub fn report_summary(&self) {
        info!("{}", self.summary);
    }

    /// 当前要素已报告的像素数
    pub fn pixel_set_size(&self) -> usize {
        self.pixset.len()
    }

    /// 像素是否已在当前要素中报告过
    pub fn pixel_visited(&self, col: i64, row: i64) -> bool {
        self.pixset.contains(col, row)
    }

    /// 读取所有波段在 `(col, row)` 处的值
    ///
    /// # 错误
    /// `values` 的长度小于波段总数时返回 [ExtractError::BandOutOfRange]；
    /// 像素超出范围或读取失败时返回相应的错误
    pub fn band_values_for_pixel(&self, col: i64, row: i64, values: &mut [f64]) -> Result<()> {
        if values.len() < self.bands.len() {
            return Err(ExtractError::BandOutOfRange {
                band: self.bands.len(),
                bands: values.len(),
            });
        }
        read_bands(&self.rasters, col, row, values)
    }

    /// 遍历所有选中的要素
    pub fn traverse(&mut self) -> Result<()> {
        self.traverse_with(TraversalContext::default())
    }

    /// 在给定上下文中遍历
    ///
    /// # 错误
    /// 没有观察者、没有矢量数据源、没有栅格、选项无效、找不到图层或 FID、
    /// 以及读取波段值失败时返回错误。单个要素处理中的几何错误只记录日志。
    pub fn traverse_with(&mut self, context: TraversalContext) -> Result<()> {
        if self.observers.is_empty() {
            error!("没有注册任何观察者");
            return Err(ExtractError::NoObservers);
        }
        if matches!(self.source, Source::None) {
            error!("没有指定矢量数据源");
            return Err(ExtractError::NoVector);
        }
        let Some(grid) = self.grid else {
            error!("没有指定任何栅格数据集");
            return Err(ExtractError::NoRasters);
        };
        if let Err(e) = self.options.validate() {
            error!("{}", e);
            return Err(e);
        }

        let mut source = std::mem::replace(&mut self.source, Source::None);
        let result = self.traverse_source(&mut source, grid, context);
        self.source = source;
        result
    }

    fn traverse_source(
        &mut self,
        source: &mut Source<'a>,
        grid: Grid,
        context: TraversalContext,
    ) -> Result<()> {
        let selection = self.options.selection.clone();
        let mut owned: Box<dyn Layer>;
        let from_sql = matches!(source, Source::Vector { .. }) && selection.sql.is_some();
        let layer: &mut dyn Layer = match source {
            Source::None => return Err(ExtractError::NoVector),
            Source::Vector { vector, layer } => match &selection.sql {
                Some(sql) => {
                    owned = vector
                        .execute_sql(sql, selection.dialect.as_deref())
                        .map_err(|e| {
                            error!("执行查询 `{}` 失败: {}", sql, e);
                            e
                        })?;
                    owned.as_mut()
                }
                None => {
                    let name = vector.name().to_string();
                    let index = *layer;
                    vector.layer(index).ok_or_else(|| {
                        let e = ExtractError::LayerNotFound {
                            vector: name,
                            layer: index.to_string(),
                        };
                        error!("{}", e);
                        e
                    })?
                }
            },
            Source::Layer(layer) => {
                if selection.sql.is_some() {
                    warn!("直接指定图层时忽略SQL语句");
                }
                &mut **layer
            }
        };
        // 嵌套遍历沿用外层遍历设置的属性过滤，SQL结果图层保留查询自带的条件
        if context.reset_reading {
            if !from_sql || selection.where_clause.is_some() {
                layer.set_attribute_filter(selection.where_clause.as_deref())?;
            }
            layer.reset_reading();
        } else if selection.where_clause.is_some() {
            warn!("嵌套遍历忽略属性过滤条件");
        }
        self.run(layer, grid)
    }

    fn run(&mut self, layer: &mut dyn Layer, grid: Grid) -> Result<()> {
        let line = LineRasterizer::new(grid.x0, grid.y0, grid.pix_x_size, grid.pix_y_size);
        self.summary = Summary::default();
        self.band_values = vec![0.; self.bands.len()];
        self.pixset.clear();

        let info = GlobalInfo {
            bands: self.bands.clone(),
            raster_envelope: grid.envelope(),
            width: grid.width,
            height: grid.height,
            grid,
            layer_name: layer.name().to_string(),
        };
        for observer in self.observers.iter_mut() {
            observer.init(&info);
        }

        let result = self.process_selected(layer, &grid, &line);

        for observer in self.observers.iter_mut() {
            observer.end();
        }
        if self.options.report_summary {
            self.report_summary();
        }
        result
    }

    /// 按 FID、字段值或全部要素的方式处理图层
    fn process_selected(&mut self, layer: &mut dyn Layer, grid: &Grid, line: &LineRasterizer) -> Result<()> {
        if let Some(fid) = self.desired_fid {
            let Some(feature) = layer.feature(fid) else {
                let e = ExtractError::FidNotFound {
                    vector: layer.name().to_string(),
                    fid,
                };
                error!("{}", e);
                return Err(e);
            };
            self.process_feature(&feature, grid, line)
        } else if let Some((name, value)) = self.desired_field.clone() {
            while let Some(feature) = layer.next_feature() {
                match feature.field_as_string(&name) {
                    None => trace!("FID {} 没有字段 `{}`", feature.fid, name),
                    Some(v) if v == value => return self.process_feature(&feature, grid, line),
                    Some(_) => {}
                }
            }
            Ok(())
        } else {
            if self.options.no_spatial_filter {
                info!("空间过滤已关闭");
                layer.set_spatial_filter(None);
            } else {
                layer.set_spatial_filter(Some(grid.envelope()));
            }
            let result = self.process_all(layer, grid, line);
            layer.set_spatial_filter(None);
            result
        }
    }

    fn process_all(&mut self, layer: &mut dyn Layer, grid: &Grid, line: &LineRasterizer) -> Result<()> {
        let total = layer.feature_count();
        if let Some(progress) = self.progress.as_mut() {
            progress.start(total);
        }
        while let Some(feature) = layer.next_feature() {
            self.process_feature(&feature, grid, line)?;
            if let Some(progress) = self.progress.as_mut() {
                progress.update();
            }
        }
        if let Some(progress) = self.progress.as_mut() {
            progress.complete();
        }
        Ok(())
    }

    /// 预变换后用于求交的几何，失败或结果为空时返回 `None`
    fn geometry_to_intersect(&self, feature: &Feature, geometry: &Geometry<f64>, grid: &Grid) -> Option<Geometry<f64>> {
        match &self.options.transform {
            None => Some(geometry.clone()),
            Some(GeometryTransform::Box(params)) => {
                let (width, height) = match params.resolve(feature, grid) {
                    Ok(dims) => dims,
                    Err(e) => {
                        warn!("FID {}: {}", feature.fid, e);
                        return None;
                    }
                };
                let bbox = self.engine.envelope(geometry)?;
                let x0 = bbox.min().x - (width - bbox.width()) / 2.;
                let y0 = bbox.min().y - (height - bbox.height()) / 2.;
                let rect = Rect::new(
                    Coord { x: x0, y: y0 },
                    Coord {
                        x: x0 + width,
                        y: y0 + height,
                    },
                );
                Some(Geometry::Polygon(rect.to_polygon()))
            }
            Some(GeometryTransform::Buffer(params)) => {
                let (distance, segments) = match params.resolve(feature, grid) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("FID {}: {}", feature.fid, e);
                        return None;
                    }
                };
                match self.engine.buffer(geometry, distance, segments) {
                    Ok(Some(buffered)) => Some(buffered),
                    Ok(None) => {
                        warn!("FID {}: 缓冲结果为空", feature.fid);
                        None
                    }
                    Err(e) => {
                        warn!("FID {}: 缓冲失败: {}", feature.fid, e);
                        None
                    }
                }
            }
        }
    }

    /// 处理单个要素
    ///
    /// 只有读取波段值失败时返回错误。
    fn process_feature(&mut self, feature: &Feature, grid: &Grid, line: &LineRasterizer) -> Result<()> {
        let Some(geometry) = feature.geometry.as_ref() else {
            debug!("FID {} 没有几何", feature.fid);
            return Ok(());
        };
        trace!("FID {}: {}", feature.fid, geometry_type(geometry));

        let Some(to_intersect) = self.geometry_to_intersect(feature, geometry, grid) else {
            return Ok(());
        };
        let intersection = match self.engine.intersection(&to_intersect, &grid.envelope()) {
            Ok(Some(g)) => g,
            Ok(None) => {
                trace!("FID {} 与栅格不相交", feature.fid);
                return Ok(());
            }
            Err(e) => {
                warn!("FID {} ({}): {}", feature.fid, geometry_type(geometry), e);
                return Ok(());
            }
        };
        self.summary.num_intersecting_features += 1;
        trace!("FID {} 交集类型: {}", feature.fid, geometry_type(&intersection));

        self.pixset.clear();
        {
            let info = IntersectionInfo {
                feature,
                geometry_to_intersect: &to_intersect,
                intersection: &intersection,
                visited: &self.pixset,
                rasters: &self.rasters,
                grid,
            };
            for observer in self.observers.iter_mut() {
                observer.intersection_found(&info);
            }
        }

        let quadtree = Quadtree::new(*grid, &self.engine, self.options.pixel_proportion);
        let dispatcher = Dispatcher::new(
            &self.engine,
            quadtree,
            *line,
            self.options.skip_invalid_polys,
            self.options.dump_polys_on_exception,
        );
        let mut sink = PixelSink {
            grid,
            visited: &mut self.pixset,
            observers: &mut self.observers,
            rasters: &self.rasters,
            band_values: &mut self.band_values,
            read_bands: self.not_simple,
            processed: 0,
            error: None,
        };
        dispatcher.process_geometry(&intersection, true, &mut sink, &mut self.summary);
        self.summary.num_processed_pixels += sink.processed;
        let error = sink.error;

        let info = IntersectionInfo {
            feature,
            geometry_to_intersect: &to_intersect,
            intersection: &intersection,
            visited: &self.pixset,
            rasters: &self.rasters,
            grid,
        };
        for observer in self.observers.iter_mut() {
            observer.intersection_end(&info);
        }
        match error {
            Some(e) => {
                error!("FID {}: {}", feature.fid, e);
                Err(e)
            }
            None => Ok(()),
        }
    }
}
