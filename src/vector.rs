use std::fmt;

use geo::{BoundingRect, Geometry, Rect};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{filter::AttributeFilter, ExtractError, Result};

/// 要素的属性值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    String(String),
}

impl FieldValue {
    /// 属性值的文本形式
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// 属性值转换为浮点数，字符串按数字解析，解析失败返回 `None`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Real(v) => Some(*v),
            FieldValue::String(s) => s.trim().parse().ok(),
        }
    }

    /// 属性值转换为整数，浮点数向零截断
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Real(v) => v.is_finite().then(|| v.trunc() as i64),
            FieldValue::String(s) => {
                let s = s.trim();
                s.parse()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.trunc() as i64))
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Real(v) => write!(f, "{}", v),
            FieldValue::String(s) => f.write_str(s),
        }
    }
}

/// 矢量要素
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub fid: i64,
    pub geometry: Option<Geometry<f64>>,
    pub fields: Vec<(String, FieldValue)>,
}

impl Feature {
    pub fn new(fid: i64, geometry: Option<Geometry<f64>>) -> Self {
        Feature {
            fid,
            geometry,
            fields: vec![],
        }
    }

    /// 添加一个属性，返回自身以便链式调用
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    /// 属性的位置，没有该属性时返回 `None`
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.field_index(name).map(|i| &self.fields[i].1)
    }

    pub fn field_as_string(&self, name: &str) -> Option<String> {
        self.field(name).map(FieldValue::as_string)
    }

    pub fn field_as_f64(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(FieldValue::as_f64)
    }

    pub fn field_as_i64(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(FieldValue::as_i64)
    }
}

/// 矢量图层
///
/// 只支持向前迭代：[Layer::next_feature] 依次返回满足当前空间过滤和属性过滤的要素，
/// [Layer::reset_reading] 回到第一个要素。修改过滤条件不会移动读取位置。
pub trait Layer {
    fn name(&self) -> &str;

    /// 回到第一个要素
    fn reset_reading(&mut self);

    /// 下一个满足过滤条件的要素
    fn next_feature(&mut self) -> Option<Feature>;

    /// 按 FID 读取要素，不受过滤条件影响，也不改变读取位置
    fn feature(&self, fid: i64) -> Option<Feature>;

    /// 满足过滤条件的要素数，无法快速得到时返回 `None`
    fn feature_count(&self) -> Option<usize>;

    /// 只返回外包矩形与 `rect` 相交的要素，`None` 取消空间过滤
    fn set_spatial_filter(&mut self, rect: Option<Rect<f64>>);

    /// 设置属性过滤条件，`None` 取消属性过滤
    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<()>;
}

/// 矢量数据源
pub trait Vector {
    fn name(&self) -> &str;

    fn layer_count(&self) -> usize;

    /// 按编号（从0开始）取图层
    fn layer(&mut self, index: usize) -> Option<&mut dyn Layer>;

    fn layer_by_name(&mut self, name: &str) -> Option<&mut dyn Layer>;

    /// 执行SQL查询，返回结果图层
    ///
    /// # 错误
    /// 语句或方言不受支持、查询的图层不存在时返回错误
    fn execute_sql(&mut self, sql: &str, dialect: Option<&str>) -> Result<Box<dyn Layer>>;
}

/// 内存中的矢量图层
#[derive(Debug, Clone, Default)]
pub struct MemLayer {
    name: String,
    features: Vec<Feature>,
    cursor: usize,
    spatial_filter: Option<Rect<f64>>,
    attribute_filter: Option<AttributeFilter>,
}

impl MemLayer {
    pub fn new(name: impl Into<String>) -> Self {
        MemLayer {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 由要素列表创建图层
    pub fn from_features(name: impl Into<String>, features: Vec<Feature>) -> Self {
        MemLayer {
            name: name.into(),
            features,
            ..Default::default()
        }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    fn accepts(&self, feature: &Feature) -> bool {
        if let Some(filter) = &self.spatial_filter {
            let overlaps = feature
                .geometry
                .as_ref()
                .and_then(|g| g.bounding_rect())
                .map_or(false, |bbox| {
                    bbox.min().x <= filter.max().x
                        && bbox.max().x >= filter.min().x
                        && bbox.min().y <= filter.max().y
                        && bbox.max().y >= filter.min().y
                });
            if !overlaps {
                return false;
            }
        }
        self.attribute_filter
            .as_ref()
            .map_or(true, |filter| filter.matches(feature))
    }
}

impl Layer for MemLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset_reading(&mut self) {
        self.cursor = 0;
    }

    fn next_feature(&mut self) -> Option<Feature> {
        while self.cursor < self.features.len() {
            let index = self.cursor;
            self.cursor += 1;
            if self.accepts(&self.features[index]) {
                return Some(self.features[index].clone());
            }
        }
        None
    }

    fn feature(&self, fid: i64) -> Option<Feature> {
        self.features.iter().find(|f| f.fid == fid).cloned()
    }

    fn feature_count(&self) -> Option<usize> {
        Some(self.features.iter().filter(|f| self.accepts(f)).count())
    }

    fn set_spatial_filter(&mut self, rect: Option<Rect<f64>>) {
        self.spatial_filter = rect;
    }

    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<()> {
        self.attribute_filter = filter.map(AttributeFilter::parse).transpose()?;
        Ok(())
    }
}

/// 内存中的矢量数据源
///
/// `execute_sql` 只支持 `SELECT * FROM <图层> [WHERE <条件>]`，
/// 方言可以省略，或者是 `OGRSQL`、`SQLITE`（不区分大小写）。
#[derive(Debug, Clone, Default)]
pub struct MemVector {
    name: String,
    layers: Vec<MemLayer>,
}

impl MemVector {
    pub fn new(name: impl Into<String>) -> Self {
        MemVector {
            name: name.into(),
            layers: vec![],
        }
    }

    pub fn with_layer(mut self, layer: MemLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn add_layer(&mut self, layer: MemLayer) {
        self.layers.push(layer);
    }
}

/// 解析 `SELECT * FROM <layer> [WHERE ...]`，返回图层名和过滤条件
fn parse_select(sql: &str) -> Result<(String, Option<String>)> {
    let unsupported = || ExtractError::UnsupportedSql(sql.to_string());
    let text = sql.trim().trim_end_matches(';').trim();
    let mut rest = text;
    let mut head = Vec::with_capacity(4);
    for _ in 0..4 {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        head.push(&rest[..end]);
        rest = &rest[end..];
    }
    let rest = rest.trim();
    match head.as_slice() {
        [select, "*", from, layer]
            if select.eq_ignore_ascii_case("select") && from.eq_ignore_ascii_case("from") =>
        {
            let layer = layer.trim_matches('"').to_string();
            if rest.is_empty() {
                return Ok((layer, None));
            }
            match rest.split_once(char::is_whitespace) {
                Some((kw, cond)) if kw.eq_ignore_ascii_case("where") && !cond.trim().is_empty() => {
                    Ok((layer, Some(cond.trim().to_string())))
                }
                _ => Err(unsupported()),
            }
        }
        _ => Err(unsupported()),
    }
}

impl Vector for MemVector {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn layer(&mut self, index: usize) -> Option<&mut dyn Layer> {
        self.layers.get_mut(index).map(|l| l as &mut dyn Layer)
    }

    fn layer_by_name(&mut self, name: &str) -> Option<&mut dyn Layer> {
        self.layers
            .iter_mut()
            .find(|l| l.name == name)
            .map(|l| l as &mut dyn Layer)
    }

    fn execute_sql(&mut self, sql: &str, dialect: Option<&str>) -> Result<Box<dyn Layer>> {
        if let Some(d) = dialect {
            if !d.eq_ignore_ascii_case("ogrsql") && !d.eq_ignore_ascii_case("sqlite") {
                return Err(ExtractError::UnsupportedSql(format!("方言 {}", d)));
            }
        }
        let (name, condition) = parse_select(sql)?;
        let source = self
            .layers
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| ExtractError::LayerNotFound {
                vector: self.name.clone(),
                layer: name.clone(),
            })?;
        debug!("SQL 查询图层 `{}`，条件 {:?}", name, condition);
        let mut result = MemLayer::from_features(name, source.features.clone());
        result.set_attribute_filter(condition.as_deref())?;
        Ok(Box::new(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, Coord};
    use pretty_assertions::assert_eq;

    fn layer() -> MemLayer {
        MemLayer::from_features(
            "plots",
            vec![
                Feature::new(1, Some(point!(x: 0.5, y: 0.5).into()))
                    .with_field("class", FieldValue::String("forest".into())),
                Feature::new(2, Some(point!(x: 10., y: 10.).into()))
                    .with_field("class", FieldValue::String("water".into())),
                Feature::new(3, None).with_field("class", FieldValue::String("forest".into())),
            ],
        )
    }

    #[test]
    fn filters() -> anyhow::Result<()> {
        let mut layer = layer();
        layer.set_attribute_filter(Some("class = 'forest'"))?;
        assert_eq!(layer.feature_count(), Some(2));
        layer.set_spatial_filter(Some(Rect::new(Coord { x: 0., y: 0. }, Coord { x: 1., y: 1. })));
        assert_eq!(layer.next_feature().map(|f| f.fid), Some(1));
        assert_eq!(layer.next_feature(), None);
        // 按 FID 读取不受过滤条件影响
        assert_eq!(layer.feature(2).map(|f| f.fid), Some(2));
        layer.set_attribute_filter(None)?;
        layer.set_spatial_filter(None);
        layer.reset_reading();
        assert_eq!(layer.feature_count(), Some(3));
        Ok(())
    }

    #[test]
    fn sql() -> anyhow::Result<()> {
        let mut vector = MemVector::new("memory").with_layer(layer());
        let mut result = vector.execute_sql("select * from plots where class = 'water'", None)?;
        assert_eq!(result.next_feature().map(|f| f.fid), Some(2));
        assert_eq!(result.next_feature(), None);
        assert!(vector.execute_sql("SELECT * FROM plots", Some("SQLite")).is_ok());
        assert!(vector.execute_sql("SELECT fid FROM plots", None).is_err());
        assert!(vector.execute_sql("SELECT * FROM plots", Some("PG")).is_err());
        assert!(matches!(
            vector.execute_sql("SELECT * FROM roads", None),
            Err(ExtractError::LayerNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn field_conversions() {
        assert_eq!(FieldValue::Real(2.5).as_string(), "2.5");
        assert_eq!(FieldValue::String(" 7 ".into()).as_i64(), Some(7));
        assert_eq!(FieldValue::String("x".into()).as_f64(), None);
        assert_eq!(FieldValue::Real(-2.7).as_i64(), Some(-2));
    }
}
