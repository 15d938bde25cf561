use geo::{Coord, Rect};
use itertools::Itertools;
use log::{debug, trace, warn};

use crate::{
    config::{DupPixelMode, GeometryTransform, NodataBands, TraversalOptions},
    engine::{GeoEngine, GeometryEngine},
    observer::{GlobalInfo, Observer, TraversalEvent},
    raster::Raster,
    traverser::{TraversalContext, Traverser},
    vector::{Feature, Layer},
    ExtractError, Result,
};

/// 方向模式下与最佳候选的最大角度差（度）
const MAX_DEGREE_DIFFERENCE: f64 = 5.;

/// 距离模式下可接受的距离为最佳距离的 `MAX_DISTANCE_PERCENTAGE + 1` 倍
const MAX_DISTANCE_PERCENTAGE: f64 = 5.;

/// 要素中心与栅格中心的距离小于此值时，方向模式视为完全吻合
const DISTANCE_EPS: f64 = 10e-5;

/// 判定无数据值时的容差
const NODATA_EPS: f64 = 10e-4;

/// 参与选择的候选栅格
#[derive(Clone)]
pub struct RasterInfo<'r> {
    /// 在选择器中的序号（从0开始）
    pub index: usize,
    pub raster: &'r dyn Raster,
    /// 可选的掩膜栅格，任一波段为0的像素视为无效
    pub mask: Option<&'r dyn Raster>,
    /// 栅格覆盖的地理范围
    pub bbox: Rect<f64>,
    pub center: Coord<f64>,
    /// 最近一次排序时的得分，越小越好
    pub distance: f64,
}

impl std::fmt::Debug for RasterInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterInfo")
            .field("index", &self.index)
            .field("raster", &self.raster.name())
            .field("mask", &self.mask.map(|m| m.name()))
            .field("bbox", &self.bbox)
            .field("distance", &self.distance)
            .finish()
    }
}

/// 外包矩形的中心
fn center_of(rect: &Rect<f64>) -> Coord<f64> {
    rect.center()
}

/// 重叠栅格的选择器
///
/// 多个栅格覆盖同一要素时，为每个要素挑选唯一的栅格，
/// 避免同一位置的像素被重复提取。依次进行：
///
/// 1. 只保留外包矩形完全包含要素的栅格；
/// 2. 配置了 `ignore_nodata` 时，剔除要素像素上出现无数据值的栅格；
/// 3. 剔除掩膜在要素像素上为0的栅格；
/// 4. 仍有多个候选时，按配置顺序应用 `direction` 和 `distance` 排序，
///    每次保留最佳候选及与其足够接近的候选。
///
/// 最终仍有多个候选时选择第一个。
pub struct RasterSelector<'r, E: GeometryEngine + Clone = GeoEngine> {
    rasters: Vec<RasterInfo<'r>>,
    options: TraversalOptions,
    engine: E,
}

impl<'r> RasterSelector<'r, GeoEngine> {
    /// # 参数
    /// * `rasters` - 候选栅格及其可选的掩膜
    /// * `options` - 遍历选项，其中 `duplicate_pixel_modes` 决定选择方式
    pub fn new(rasters: Vec<(&'r dyn Raster, Option<&'r dyn Raster>)>, options: TraversalOptions) -> Self {
        RasterSelector::with_engine(rasters, options, GeoEngine)
    }
}

impl<'r, E: GeometryEngine + Clone> RasterSelector<'r, E> {
    pub fn with_engine(
        rasters: Vec<(&'r dyn Raster, Option<&'r dyn Raster>)>,
        options: TraversalOptions,
        engine: E,
    ) -> Self {
        let rasters = rasters
            .into_iter()
            .enumerate()
            .map(|(index, (raster, mask))| {
                let bbox = raster.grid().envelope();
                RasterInfo {
                    index,
                    raster,
                    mask,
                    bbox,
                    center: center_of(&bbox),
                    distance: 0.,
                }
            })
            .collect();
        RasterSelector {
            rasters,
            options,
            engine,
        }
    }

    pub fn rasters(&self) -> &[RasterInfo<'r>] {
        &self.rasters
    }

    /// 所有栅格外包矩形的并
    pub fn coverage(&self) -> Option<Rect<f64>> {
        self.rasters.iter().map(|info| info.bbox).reduce(|a, b| {
            Rect::new(
                Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        })
    }

    /// 为要素选择一个栅格，返回其序号
    ///
    /// 没有合适的栅格时返回 `None`。`layer` 用于对候选栅格做嵌套的单要素遍历，
    /// 其读取位置不会被改变。
    pub fn select(&mut self, layer: &mut dyn Layer, feature: &Feature) -> Option<usize> {
        let geometry = feature.geometry.as_ref()?;
        let env = self.engine.envelope(geometry)?;
        let feature_center = center_of(&env);

        let mut candidates: Vec<usize> = self
            .rasters
            .iter()
            .filter(|info| contains(&info.bbox, &env))
            .map(|info| info.index)
            .collect();
        trace!(
            "FID {}: 包含要素的栅格: {}",
            feature.fid,
            self.names(&candidates)
        );
        if candidates.is_empty() {
            debug!("FID {}: 没有栅格包含该要素", feature.fid);
            return None;
        }

        if let Some(policy) = self.options.nodata_policy() {
            candidates.retain(|&i| self.ok_for_nodata(policy, layer, feature, self.rasters[i].raster));
            trace!(
                "FID {}: 通过无数据检查的栅格: {}",
                feature.fid,
                self.names(&candidates)
            );
            if candidates.is_empty() {
                debug!("FID {}: 所有栅格在要素上都有无数据值", feature.fid);
                return None;
            }
        }

        candidates.retain(|&i| match self.rasters[i].mask {
            Some(mask) => self.within_mask(layer, feature, mask),
            None => true,
        });
        if candidates.is_empty() {
            debug!("FID {}: 所有栅格都被掩膜排除", feature.fid);
            return None;
        }
        if candidates.len() == 1 {
            return candidates.first().copied();
        }

        let modes = self.options.duplicate_pixel_modes.clone();
        for mode in &modes {
            if candidates.len() <= 1 {
                break;
            }
            match mode {
                DupPixelMode::IgnoreNodata(_) => continue,
                DupPixelMode::Direction(angle) => {
                    for &i in &candidates {
                        let info = &mut self.rasters[i];
                        let d = distance(feature_center, info.center);
                        info.distance = if d <= DISTANCE_EPS {
                            0.
                        } else {
                            (angle_of(feature_center, info.center) - angle).abs()
                        };
                    }
                }
                DupPixelMode::Distance => {
                    for &i in &candidates {
                        let info = &mut self.rasters[i];
                        info.distance = distance(feature_center, info.center);
                    }
                }
            }
            candidates.sort_by(|&a, &b| self.rasters[a].distance.total_cmp(&self.rasters[b].distance));
            let best = self.rasters[candidates[0]].distance;
            candidates.retain(|&i| {
                let score = self.rasters[i].distance;
                match mode {
                    DupPixelMode::Direction(_) => score - best <= MAX_DEGREE_DIFFERENCE,
                    _ => score <= (MAX_DISTANCE_PERCENTAGE + 1.) * best,
                }
            });
            trace!(
                "FID {}: `{}` 之后的候选: {}",
                feature.fid,
                mode,
                self.names(&candidates)
            );
        }

        if candidates.len() > 1 {
            warn!(
                "FID {}: 多个栅格同样满足条件 ({})，选择第一个",
                feature.fid,
                self.names(&candidates)
            );
        }
        candidates.first().copied()
    }

    /// 对图层中的要素逐个选择栅格并调用 `extract`
    ///
    /// 给定 `fid` 时只处理该要素；否则以所有栅格范围的并作为空间过滤条件遍历整个图层。
    ///
    /// # 错误
    /// 找不到 `fid` 时返回 [ExtractError::FidNotFound]；`extract` 返回的错误会终止遍历
    pub fn run<F>(&mut self, layer: &mut dyn Layer, fid: Option<i64>, mut extract: F) -> Result<()>
    where
        F: FnMut(&mut dyn Layer, &Feature, &RasterInfo<'r>) -> Result<()>,
    {
        if matches!(self.options.transform, Some(GeometryTransform::Buffer(_))) {
            warn!("选择栅格时忽略缓冲区，提取时仍会应用");
        }
        layer.reset_reading();

        if let Some(fid) = fid {
            let feature = layer.feature(fid).ok_or_else(|| ExtractError::FidNotFound {
                vector: layer.name().to_string(),
                fid,
            })?;
            if let Some(i) = self.select(layer, &feature) {
                extract(layer, &feature, &self.rasters[i])?;
            }
            return Ok(());
        }

        layer.set_spatial_filter(self.coverage());
        let result = self.select_all(layer, &mut extract);
        layer.set_spatial_filter(None);
        result
    }

    fn select_all<F>(&mut self, layer: &mut dyn Layer, extract: &mut F) -> Result<()>
    where
        F: FnMut(&mut dyn Layer, &Feature, &RasterInfo<'r>) -> Result<()>,
    {
        while let Some(feature) = layer.next_feature() {
            if let Some(i) = self.select(layer, &feature) {
                extract(layer, &feature, &self.rasters[i])?;
            }
        }
        Ok(())
    }

    fn names(&self, candidates: &[usize]) -> String {
        candidates
            .iter()
            .map(|&i| self.rasters[i].raster.name())
            .join(", ")
    }

    /// 以单个栅格遍历要素，不改变图层的读取位置
    fn probe(&self, layer: &mut dyn Layer, feature: &Feature, raster: &dyn Raster, observer: &mut dyn Observer) -> Result<()> {
        let mut options = self.options.clone();
        options.selection = Default::default();
        options.report_summary = false;
        let mut traverser = Traverser::with_engine(self.engine.clone(), options);
        traverser.set_layer(layer);
        traverser.set_desired_fid(feature.fid);
        traverser.add_raster(raster)?;
        traverser.add_observer(observer);
        traverser.traverse_with(TraversalContext {
            reset_reading: false,
        })
    }

    fn ok_for_nodata(&self, policy: NodataBands, layer: &mut dyn Layer, feature: &Feature, raster: &dyn Raster) -> bool {
        let mut observer = NodataObserver::new(policy, self.options.nodata);
        match self.probe(layer, feature, raster, &mut observer) {
            Ok(()) => observer.ok && !observer.found,
            Err(e) => {
                warn!("FID {}: 无法检查 `{}` 的无数据值: {}", feature.fid, raster.name(), e);
                false
            }
        }
    }

    fn within_mask(&self, layer: &mut dyn Layer, feature: &Feature, mask: &dyn Raster) -> bool {
        let mut observer = MaskObserver::default();
        match self.probe(layer, feature, mask, &mut observer) {
            Ok(()) => observer.ok && !observer.zero_found,
            Err(e) => {
                warn!("FID {}: 无法检查掩膜 `{}`: {}", feature.fid, mask.name(), e);
                false
            }
        }
    }
}

/// 闭区间意义下 `outer` 是否包含 `inner`
fn contains(outer: &Rect<f64>, inner: &Rect<f64>) -> bool {
    outer.min().x <= inner.min().x
        && outer.min().y <= inner.min().y
        && inner.max().x <= outer.max().x
        && inner.max().y <= outer.max().y
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// 向量 `a -> b` 的方向角（度）
fn angle_of(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (b.y - a.y).atan2(b.x - a.x).to_degrees()
}

/// 检查像素是否违反 `ignore_nodata` 策略
struct NodataObserver {
    policy: NodataBands,
    nodata: f64,
    ok: bool,
    found: bool,
}

impl NodataObserver {
    fn new(policy: NodataBands, nodata: f64) -> Self {
        NodataObserver {
            policy,
            nodata,
            ok: false,
            found: false,
        }
    }

    fn is_nodata(&self, value: f64) -> bool {
        (value - self.nodata).abs() <= NODATA_EPS
    }
}

impl Observer for NodataObserver {
    fn init(&mut self, info: &GlobalInfo) {
        let bands = info.bands.len();
        if bands == 0 {
            warn!("栅格没有波段");
            return;
        }
        if let NodataBands::Band(band) = self.policy {
            if band == 0 || band > bands {
                warn!("波段编号 {} 不在 1..={} 之内", band, bands);
                return;
            }
        }
        self.ok = true;
    }

    fn add_pixel(&mut self, event: &TraversalEvent<'_>) {
        if !self.ok || self.found {
            return;
        }
        let Some(values) = event.band_values else {
            return;
        };
        self.found = match self.policy {
            NodataBands::Band(band) => values.get(band - 1).is_some_and(|&v| self.is_nodata(v)),
            NodataBands::AnyBand => values.iter().any(|&v| self.is_nodata(v)),
            NodataBands::AllBands => values.iter().all(|&v| self.is_nodata(v)),
        };
        if self.found {
            trace!("像素 [{}, {}] 为无数据值", event.col, event.row);
        }
    }
}

/// 检查掩膜像素是否有0值
#[derive(Default)]
struct MaskObserver {
    ok: bool,
    zero_found: bool,
}

impl Observer for MaskObserver {
    fn init(&mut self, info: &GlobalInfo) {
        if info.bands.is_empty() {
            warn!("掩膜没有波段");
            return;
        }
        self.ok = true;
    }

    fn add_pixel(&mut self, event: &TraversalEvent<'_>) {
        if !self.ok || self.zero_found {
            return;
        }
        if let Some(values) = event.band_values {
            // 掩膜按整数解释，小数部分不算有效值
            self.zero_found = values.iter().any(|&v| v.trunc() == 0.);
        }
    }
}
