//! Haar cascade classifier loaded from OpenCV cascade XML.
//!
//! Reads both the current `opencv-cascade-classifier` layout (shared
//! feature table, `internalNodes`/`leafValues` per weak classifier) and the
//! legacy `opencv-haar-classifier` layout (inline features per tree node).
//! Detection scans an image pyramid with variance-normalized features and
//! merges raw hits with [`group_rectangles`].

use crate::classifier::Classifier;
use crate::frame::GrayView;
use crate::grouping::{group_rectangles, GROUP_EPS};
use crate::integral::IntegralImages;
use crate::types::{DetectParams, Rect, Size};
use image::imageops::{self, FilterType};
use image::GrayImage;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

/// Smallest window that leaves a non-empty normalization area.
const MIN_WINDOW_SIDE: u32 = 3;
/// Above this pyramid factor every position is scanned.
const DENSE_SCAN_FACTOR: f64 = 2.0;
/// Legacy tilted rects were scaled by half at evaluation time.
const LEGACY_TILTED_WEIGHT: f64 = 0.5;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed cascade: {0}")]
    Malformed(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

/// Which XML layout a cascade was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeLayout {
    Current,
    Legacy,
}

/// Shape of a loaded cascade, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeSummary {
    pub layout: CascadeLayout,
    pub window: Size,
    pub stages: usize,
    pub weak_classifiers: usize,
    pub features: usize,
    pub tilted: bool,
}

#[derive(Debug, Clone)]
struct WeightedRect {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<WeightedRect>,
    tilted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Branch {
    Node(usize),
    Leaf(usize),
}

#[derive(Debug, Clone)]
struct Node {
    feature: usize,
    threshold: f64,
    left: Branch,
    right: Branch,
}

/// A boosted decision tree; node 0 is the root.
#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    weak: Vec<WeakClassifier>,
}

/// A boosted Haar cascade, immutable once loaded.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    layout: CascadeLayout,
    window: Size,
    stages: Vec<Stage>,
    features: Vec<Feature>,
    has_tilted: bool,
}

impl HaarCascade {
    /// Load a cascade XML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cascade = Self::from_xml_str(&xml)?;

        tracing::info!(
            path = %path.display(),
            layout = ?cascade.layout,
            window = %format!("{}x{}", cascade.window.width, cascade.window.height),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            tilted = cascade.has_tilted,
            "loaded cascade"
        );
        Ok(cascade)
    }

    /// Parse cascade XML already in memory.
    pub fn from_xml_str(xml: &str) -> Result<Self, CascadeError> {
        let doc = parse_document(xml)?;
        let storage = doc.require("opencv_storage")?;
        let root = storage
            .children
            .first()
            .ok_or_else(|| malformed("empty opencv_storage"))?;

        let cascade = if root.child("size").is_some() {
            parse_legacy(root)?
        } else {
            parse_current(root)?
        };
        cascade.validate()?;
        Ok(cascade)
    }

    pub fn window(&self) -> Size {
        self.window
    }

    pub fn summary(&self) -> CascadeSummary {
        CascadeSummary {
            layout: self.layout,
            window: self.window,
            stages: self.stages.len(),
            weak_classifiers: self.stages.iter().map(|s| s.weak.len()).sum(),
            features: self.features.len(),
            tilted: self.has_tilted,
        }
    }

    /// Run a multi-scale scan over `image`, returning regions in image
    /// coordinates.
    pub fn detect_image(&self, image: &GrayImage, params: &DetectParams) -> Vec<Rect> {
        if let Err(reason) = params.validate() {
            tracing::warn!(%reason, "refusing detection pass");
            return Vec::new();
        }

        let (width, height) = image.dimensions();
        let scales = self.pyramid_scales(width, height, params);
        let (win_w, win_h) = (self.window.width as usize, self.window.height as usize);
        let mut hits = Vec::new();

        for &factor in &scales {
            let scaled_w = (width as f64 / factor).round() as u32;
            let scaled_h = (height as f64 / factor).round() as u32;
            let level: Cow<'_, GrayImage> = if (scaled_w, scaled_h) == (width, height) {
                Cow::Borrowed(image)
            } else {
                Cow::Owned(imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle))
            };

            let integral = IntegralImages::compute(&level, self.has_tilted);
            let step = if factor > DENSE_SCAN_FACTOR { 1 } else { 2 };
            let hit_w = (self.window.width as f64 * factor).round() as i32;
            let hit_h = (self.window.height as f64 * factor).round() as i32;

            let mut y = 0usize;
            while y + win_h <= scaled_h as usize {
                let mut x = 0usize;
                while x + win_w <= scaled_w as usize {
                    match self.classify_window(&integral, x, y) {
                        Ok(()) => hits.push(Rect::new(
                            (x as f64 * factor).round() as i32,
                            (y as f64 * factor).round() as i32,
                            hit_w,
                            hit_h,
                        )),
                        // Rejected by the first stage: the neighbor is unlikely too.
                        Err(0) => x += step,
                        Err(_) => {}
                    }
                    x += step;
                }
                y += step;
            }
        }

        tracing::trace!(
            levels = scales.len(),
            raw_hits = hits.len(),
            "cascade scan complete"
        );
        group_rectangles(hits, params.min_neighbors, GROUP_EPS)
    }

    /// Pyramid factors whose scaled window fits the size bounds and whose
    /// downscaled image still holds one window.
    fn pyramid_scales(&self, width: u32, height: u32, params: &DetectParams) -> Vec<f64> {
        let max = match params.max_size {
            Some(s) if s.width > 0 && s.height > 0 => s,
            _ => Size::new(width, height),
        };
        let base_w = self.window.width as f64;
        let base_h = self.window.height as f64;

        let mut scales = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let win_w = (base_w * factor).round() as u32;
            let win_h = (base_h * factor).round() as u32;
            if win_w > max.width || win_h > max.height {
                break;
            }
            let too_small = win_w < params.min_size.width || win_h < params.min_size.height;
            if !too_small {
                let scaled_w = (width as f64 / factor).round() as u32;
                let scaled_h = (height as f64 / factor).round() as u32;
                if scaled_w < self.window.width || scaled_h < self.window.height {
                    break;
                }
                scales.push(factor);
            }
            factor *= params.scale_factor;
        }
        scales
    }

    /// Run the window at `(x, y)` through every stage. `Err(stage)` names
    /// the stage that rejected it.
    fn classify_window(&self, ii: &IntegralImages, x: usize, y: usize) -> Result<(), usize> {
        let nf = self.normalization(ii, x, y);
        for (si, stage) in self.stages.iter().enumerate() {
            let sum: f64 = stage
                .weak
                .iter()
                .map(|wc| self.evaluate_tree(wc, ii, x, y, nf))
                .sum();
            if sum < stage.threshold {
                return Err(si);
            }
        }
        Ok(())
    }

    /// `area * stddev` of the window inset by one pixel; 1 on flat patches.
    fn normalization(&self, ii: &IntegralImages, x: usize, y: usize) -> f64 {
        let w = self.window.width as usize - 2;
        let h = self.window.height as usize - 2;
        let area = (w * h) as f64;
        let sum = ii.rect_sum(x + 1, y + 1, w, h) as f64;
        let sqsum = ii.rect_sqsum(x + 1, y + 1, w, h) as f64;
        let nf = area * sqsum - sum * sum;
        if nf > 0.0 {
            nf.sqrt()
        } else {
            1.0
        }
    }

    fn evaluate_tree(
        &self,
        wc: &WeakClassifier,
        ii: &IntegralImages,
        x: usize,
        y: usize,
        nf: f64,
    ) -> f64 {
        let mut idx = 0;
        loop {
            let node = &wc.nodes[idx];
            let value = self.feature_value(&self.features[node.feature], ii, x, y);
            let branch = if value < node.threshold * nf {
                node.left
            } else {
                node.right
            };
            match branch {
                Branch::Node(next) => idx = next,
                Branch::Leaf(leaf) => return wc.leaves[leaf],
            }
        }
    }

    fn feature_value(&self, feature: &Feature, ii: &IntegralImages, x: usize, y: usize) -> f64 {
        feature
            .rects
            .iter()
            .map(|r| {
                let sum = if feature.tilted {
                    ii.tilted_sum(
                        x as i64 + r.x as i64,
                        y as i64 + r.y as i64,
                        r.width as i64,
                        r.height as i64,
                    )
                } else {
                    ii.rect_sum(
                        x + r.x as usize,
                        y + r.y as usize,
                        r.width as usize,
                        r.height as usize,
                    )
                };
                r.weight * sum as f64
            })
            .sum()
    }

    /// Reject anything the evaluator could index out of bounds or loop on.
    fn validate(&self) -> Result<(), CascadeError> {
        let (ww, wh) = (self.window.width as i64, self.window.height as i64);
        if self.window.width < MIN_WINDOW_SIDE || self.window.height < MIN_WINDOW_SIDE {
            return Err(malformed(format!(
                "window {ww}x{wh} is smaller than {MIN_WINDOW_SIDE}x{MIN_WINDOW_SIDE}"
            )));
        }
        if self.stages.is_empty() {
            return Err(malformed("cascade has no stages"));
        }

        for (fi, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(malformed(format!("feature {fi} has no rects")));
            }
            for r in &feature.rects {
                let (x, y, w, h) = (r.x as i64, r.y as i64, r.width as i64, r.height as i64);
                let inside = if feature.tilted {
                    w >= 0 && h >= 0 && y >= 0 && x - h >= 0 && x + w <= ww && y + w + h <= wh
                } else {
                    w >= 0 && h >= 0 && x >= 0 && y >= 0 && x + w <= ww && y + h <= wh
                };
                if !inside {
                    return Err(malformed(format!(
                        "feature {fi} rect ({x}, {y}, {w}, {h}) leaves the {ww}x{wh} window"
                    )));
                }
            }
        }

        for (si, stage) in self.stages.iter().enumerate() {
            if stage.weak.is_empty() {
                return Err(malformed(format!("stage {si} has no weak classifiers")));
            }
            for wc in &stage.weak {
                if wc.nodes.is_empty() {
                    return Err(malformed(format!("stage {si} has an empty tree")));
                }
                for (ni, node) in wc.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return Err(malformed(format!(
                            "stage {si} references missing feature {}",
                            node.feature
                        )));
                    }
                    for branch in [node.left, node.right] {
                        let ok = match branch {
                            // Children must come later so evaluation terminates.
                            Branch::Node(next) => next > ni && next < wc.nodes.len(),
                            Branch::Leaf(leaf) => leaf < wc.leaves.len(),
                        };
                        if !ok {
                            return Err(malformed(format!(
                                "stage {si} node {ni} has dangling branch {branch:?}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl Classifier for HaarCascade {
    fn detect(&self, image: GrayView<'_>, params: &DetectParams) -> Vec<Rect> {
        self.detect_image(&image.to_image(), params)
    }
}

fn malformed(msg: impl Into<String>) -> CascadeError {
    CascadeError::Malformed(msg.into())
}

// --- Current layout ---

fn parse_current(root: &XmlNode) -> Result<HaarCascade, CascadeError> {
    if let Some(stage_type) = root.child("stageType") {
        if !stage_type.text.trim().eq_ignore_ascii_case("BOOST") {
            return Err(CascadeError::Unsupported(format!(
                "stage type {}",
                stage_type.text.trim()
            )));
        }
    }
    let feature_type = root.require("featureType")?.text.trim();
    if !feature_type.eq_ignore_ascii_case("HAAR") {
        return Err(CascadeError::Unsupported(format!(
            "feature type {feature_type} (only HAAR is supported)"
        )));
    }

    let window = Size::new(
        root.require("width")?.integer()? as u32,
        root.require("height")?.integer()? as u32,
    );

    let mut features = Vec::new();
    for item in root.require("features")?.items() {
        let tilted = match item.child("tilted") {
            Some(t) => t.integer()? != 0,
            None => false,
        };
        let rects = item
            .require("rects")?
            .items()
            .map(|r| parse_weighted_rect(r, 1.0))
            .collect::<Result<Vec<_>, _>>()?;
        features.push(Feature { rects, tilted });
    }

    let mut stages = Vec::new();
    for item in root.require("stages")?.items() {
        let threshold = item.require("stageThreshold")?.number()?;
        let mut weak = Vec::new();
        for wc in item.require("weakClassifiers")?.items() {
            let raw = wc.require("internalNodes")?.numbers()?;
            if raw.is_empty() || raw.len() % 4 != 0 {
                return Err(malformed(format!(
                    "internalNodes must hold groups of 4 values, got {}",
                    raw.len()
                )));
            }
            let nodes = raw
                .chunks_exact(4)
                .map(|n| {
                    Ok(Node {
                        left: current_branch(n[0])?,
                        right: current_branch(n[1])?,
                        feature: index(n[2], "feature index")?,
                        threshold: n[3],
                    })
                })
                .collect::<Result<Vec<_>, CascadeError>>()?;
            let leaves = wc.require("leafValues")?.numbers()?;
            weak.push(WeakClassifier { nodes, leaves });
        }
        stages.push(Stage { threshold, weak });
    }

    let has_tilted = features.iter().any(|f| f.tilted);
    Ok(HaarCascade {
        layout: CascadeLayout::Current,
        window,
        stages,
        features,
        has_tilted,
    })
}

/// Positive values index nodes; zero and negatives index leaves.
fn current_branch(value: f64) -> Result<Branch, CascadeError> {
    let v = integral_value(value, "branch")?;
    Ok(if v > 0 {
        Branch::Node(v as usize)
    } else {
        Branch::Leaf((-v) as usize)
    })
}

// --- Legacy layout ---

fn parse_legacy(root: &XmlNode) -> Result<HaarCascade, CascadeError> {
    let size = root.require("size")?.numbers()?;
    let [w, h] = size[..] else {
        return Err(malformed(format!("size needs 2 values, got {}", size.len())));
    };
    let window = Size::new(
        integral_value(w, "window width")? as u32,
        integral_value(h, "window height")? as u32,
    );

    let mut features = Vec::new();
    let mut stages = Vec::new();
    for item in root.require("stages")?.items() {
        let threshold = item.require("stage_threshold")?.number()?;
        let mut weak = Vec::new();

        for tree in item.require("trees")?.items() {
            let mut nodes = Vec::new();
            let mut leaves = Vec::new();

            for node in tree.items() {
                let feat = node.require("feature")?;
                let tilted = match feat.child("tilted") {
                    Some(t) => t.integer()? != 0,
                    None => false,
                };
                let scale = if tilted { LEGACY_TILTED_WEIGHT } else { 1.0 };
                let rects = feat
                    .require("rects")?
                    .items()
                    .map(|r| parse_weighted_rect(r, scale))
                    .collect::<Result<Vec<_>, _>>()?;
                features.push(Feature { rects, tilted });

                let left = legacy_branch(node, "left_val", "left_node", &mut leaves)?;
                let right = legacy_branch(node, "right_val", "right_node", &mut leaves)?;
                nodes.push(Node {
                    feature: features.len() - 1,
                    threshold: node.require("threshold")?.number()?,
                    left,
                    right,
                });
            }
            weak.push(WeakClassifier { nodes, leaves });
        }
        stages.push(Stage { threshold, weak });
    }

    let has_tilted = features.iter().any(|f| f.tilted);
    Ok(HaarCascade {
        layout: CascadeLayout::Legacy,
        window,
        stages,
        features,
        has_tilted,
    })
}

fn legacy_branch(
    node: &XmlNode,
    val_tag: &str,
    node_tag: &str,
    leaves: &mut Vec<f64>,
) -> Result<Branch, CascadeError> {
    if let Some(val) = node.child(val_tag) {
        leaves.push(val.number()?);
        return Ok(Branch::Leaf(leaves.len() - 1));
    }
    if let Some(next) = node.child(node_tag) {
        return Ok(Branch::Node(index(next.number()?, node_tag)?));
    }
    Err(malformed(format!("tree node has neither {val_tag} nor {node_tag}")))
}

// --- Shared value parsing ---

fn parse_weighted_rect(node: &XmlNode, weight_scale: f64) -> Result<WeightedRect, CascadeError> {
    let v = node.numbers()?;
    let [x, y, w, h, weight] = v[..] else {
        return Err(malformed(format!(
            "feature rect needs 5 values, got {}",
            v.len()
        )));
    };
    Ok(WeightedRect {
        x: integral_value(x, "rect x")? as i32,
        y: integral_value(y, "rect y")? as i32,
        width: integral_value(w, "rect width")? as i32,
        height: integral_value(h, "rect height")? as i32,
        weight: weight * weight_scale,
    })
}

fn integral_value(value: f64, what: &str) -> Result<i64, CascadeError> {
    if value.fract() != 0.0 || !value.is_finite() || value.abs() > i32::MAX as f64 {
        return Err(malformed(format!("{what} must be an integer, got {value}")));
    }
    Ok(value as i64)
}

fn index(value: f64, what: &str) -> Result<usize, CascadeError> {
    let v = integral_value(value, what)?;
    usize::try_from(v).map_err(|_| malformed(format!("{what} must not be negative, got {v}")))
}

// --- Minimal XML tree ---

/// Element name, concatenated text, and child elements. Attributes and
/// comments are dropped.
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn require(&self, name: &str) -> Result<&XmlNode, CascadeError> {
        self.child(name)
            .ok_or_else(|| malformed(format!("<{}> is missing <{name}>", self.name)))
    }

    /// OpenCV sequence entries (`<_>` children).
    fn items(&self) -> impl Iterator<Item = &XmlNode> {
        self.children.iter().filter(|c| c.name == "_")
    }

    fn numbers(&self) -> Result<Vec<f64>, CascadeError> {
        self.text
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| {
                    malformed(format!("<{}> holds non-numeric value {tok:?}", self.name))
                })
            })
            .collect()
    }

    fn number(&self) -> Result<f64, CascadeError> {
        let values = self.numbers()?;
        match values[..] {
            [v] => Ok(v),
            _ => Err(malformed(format!(
                "<{}> needs one value, got {}",
                self.name,
                values.len()
            ))),
        }
    }

    fn integer(&self) -> Result<i64, CascadeError> {
        integral_value(self.number()?, &self.name)
    }
}

fn parse_document(xml: &str) -> Result<XmlNode, CascadeError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack = vec![XmlNode::default()];
    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(XmlNode {
                name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                ..XmlNode::default()
            }),
            Event::Empty(e) => {
                let node = XmlNode {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..XmlNode::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if stack.len() < 2 {
                    return Err(malformed(format!("unexpected </{name}>")));
                }
                let node = stack.pop().unwrap_or_default();
                if node.name != name {
                    return Err(malformed(format!(
                        "</{name}> closes <{}>",
                        node.name
                    )));
                }
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                if let Some(node) = stack.last_mut() {
                    if !node.text.is_empty() {
                        node.text.push(' ');
                    }
                    node.text.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        let open = stack.last().map(|n| n.name.clone()).unwrap_or_default();
        return Err(malformed(format!("document ends inside <{open}>")));
    }
    Ok(stack.pop().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One stump: bottom half minus top half of a 6x6 window, firing on a
    /// dark-over-bright horizontal edge.
    const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>6</height>
  <width>6</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <!-- stage 0 -->
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1.0000000149011612e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 6 6 -1.</_>
        <_>
          0 3 6 3 2.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    const EDGE_CASCADE_LEGACY: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<edge_cascade type_id="opencv-haar-classifier">
  <size>6 6</size>
  <stages>
    <_>
      <!-- stage 0 -->
      <trees>
        <_>
          <!-- tree 0 -->
          <_>
            <!-- root node -->
            <feature>
              <rects>
                <_>0 0 6 6 -1.</_>
                <_>0 3 6 3 2.</_></rects>
              <tilted>0</tilted></feature>
            <threshold>0.1</threshold>
            <left_val>-1.</left_val>
            <right_val>1.</right_val></_></_></trees>
      <stage_threshold>0.</stage_threshold>
      <parent>-1</parent>
      <next>-1</next></_></stages></edge_cascade>
</opencv_storage>
"#;

    /// Single-stump cascade over a square window in the current layout.
    fn stump_cascade(side: u32, rects: &[&str], tilted: bool) -> String {
        let rects: String = rects.iter().map(|r| format!("<_>{r}</_>")).collect();
        format!(
            "<opencv_storage><cascade><stageType>BOOST</stageType>\
             <featureType>HAAR</featureType><height>{side}</height><width>{side}</width>\
             <stages><_><stageThreshold>0.</stageThreshold><weakClassifiers><_>\
             <internalNodes>0 -1 0 0.1</internalNodes><leafValues>-1. 1.</leafValues>\
             </_></weakClassifiers></_></stages>\
             <features><_><rects>{rects}</rects><tilted>{}</tilted></_></features>\
             </cascade></opencv_storage>",
            u8::from(tilted)
        )
    }

    /// Bright center against a dark surround; zero on any flat patch.
    fn blob_cascade() -> HaarCascade {
        HaarCascade::from_xml_str(&stump_cascade(20, &["0 0 20 20 -1.", "5 5 10 10 4."], false))
            .unwrap()
    }

    /// White square of `side` pixels at `(origin, origin)` on black.
    fn square_image(size: u32, origin: u32, side: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let inside = (origin..origin + side).contains(&x) && (origin..origin + side).contains(&y);
            image::Luma([if inside { 255 } else { 0 }])
        })
    }

    /// Rows above 20 black, rows from 20 down white.
    fn edge_image() -> GrayImage {
        GrayImage::from_fn(40, 40, |_, y| image::Luma([if y < 20 { 0 } else { 255 }]))
    }

    fn single_scale() -> DetectParams {
        DetectParams {
            scale_factor: 1.3,
            min_neighbors: 0,
            min_size: Size::new(6, 6),
            max_size: Some(Size::new(6, 6)),
        }
    }

    #[test]
    fn test_parse_current_layout() {
        let cascade = HaarCascade::from_xml_str(EDGE_CASCADE).unwrap();
        let summary = cascade.summary();
        assert_eq!(summary.layout, CascadeLayout::Current);
        assert_eq!(summary.window, Size::new(6, 6));
        assert_eq!(summary.stages, 1);
        assert_eq!(summary.weak_classifiers, 1);
        assert_eq!(summary.features, 1);
        assert!(!summary.tilted);
        assert_eq!(cascade.stages[0].weak[0].nodes[0].left, Branch::Leaf(0));
        assert_eq!(cascade.stages[0].weak[0].nodes[0].right, Branch::Leaf(1));
    }

    #[test]
    fn test_parse_legacy_layout() {
        let cascade = HaarCascade::from_xml_str(EDGE_CASCADE_LEGACY).unwrap();
        assert_eq!(cascade.summary().layout, CascadeLayout::Legacy);
        assert_eq!(cascade.window(), Size::new(6, 6));
        assert_eq!(cascade.stages[0].weak[0].leaves, vec![-1.0, 1.0]);
    }

    #[test]
    fn test_detects_edge_only_where_windows_straddle_it() {
        let cascade = HaarCascade::from_xml_str(EDGE_CASCADE).unwrap();
        let hits = cascade.detect_image(&edge_image(), &single_scale());

        // Windows at y = 16 and y = 18 hold the edge in their lower half;
        // 18 x positions each.
        assert_eq!(hits.len(), 36);
        for hit in &hits {
            assert_eq!((hit.width, hit.height), (6, 6));
            assert!(hit.y == 16 || hit.y == 18, "unexpected hit {hit:?}");
        }
    }

    #[test]
    fn test_legacy_layout_detects_the_same() {
        let current = HaarCascade::from_xml_str(EDGE_CASCADE).unwrap();
        let legacy = HaarCascade::from_xml_str(EDGE_CASCADE_LEGACY).unwrap();
        let img = edge_image();
        assert_eq!(
            current.detect_image(&img, &single_scale()),
            legacy.detect_image(&img, &single_scale())
        );
    }

    #[test]
    fn test_flat_image_has_no_detections() {
        let cascade = HaarCascade::from_xml_str(EDGE_CASCADE).unwrap();
        let gray = GrayImage::from_pixel(64, 48, image::Luma([128]));
        assert!(cascade.detect_image(&gray, &single_scale()).is_empty());

        let black = GrayImage::from_pixel(64, 48, image::Luma([0]));
        let mut params = single_scale();
        params.max_size = None;
        assert!(cascade.detect_image(&black, &params).is_empty());
    }

    #[test]
    fn test_classifier_trait_scans_a_view() {
        let cascade = HaarCascade::from_xml_str(EDGE_CASCADE).unwrap();
        let img = edge_image();
        let gray = crate::frame::GrayFrame::new(img.as_raw().clone(), 40, 40).unwrap();
        let hits = Classifier::detect(&cascade, gray.view(), &single_scale());
        assert_eq!(hits.len(), 36);
    }

    #[test]
    fn test_pyramid_hits_map_back_to_source_scale() {
        let cascade = HaarCascade::from_xml_str(EDGE_CASCADE).unwrap();
        let img = GrayImage::from_fn(80, 80, |_, y| image::Luma([if y < 40 { 0 } else { 255 }]));
        let params = DetectParams {
            scale_factor: 2.0,
            min_neighbors: 0,
            min_size: Size::new(12, 12),
            max_size: Some(Size::new(12, 12)),
        };

        // Only the half-size level runs; its 6x6 windows come back as 12x12
        // at doubled coordinates.
        let hits = cascade.detect_image(&img, &params);
        assert!(!hits.is_empty());
        for hit in &hits {
            assert_eq!((hit.width, hit.height), (12, 12));
            assert_eq!(hit.x % 4, 0, "unexpected hit {hit:?}");
            assert!([28, 32, 36, 40].contains(&hit.y), "unexpected hit {hit:?}");
        }
        assert!(hits.iter().any(|h| h.y == 32));
        assert!(hits.iter().any(|h| h.y == 36));
    }

    #[test]
    fn test_neighbor_grouping_merges_cluster() {
        let cascade = blob_cascade();
        let img = square_image(60, 25, 10);
        let mut params = DetectParams {
            scale_factor: 1.3,
            min_neighbors: 0,
            min_size: Size::new(20, 20),
            max_size: Some(Size::new(20, 20)),
        };
        assert!(cascade.detect_image(&img, &params).len() > 1);

        params.min_neighbors = 1;
        let grouped = cascade.detect_image(&img, &params);
        assert_eq!(grouped.len(), 1);
        let r = grouped[0];
        assert_eq!((r.width, r.height), (20, 20));
        assert!((19..=23).contains(&r.x) && (18..=22).contains(&r.y), "{r:?}");

        let flat = GrayImage::from_pixel(60, 60, image::Luma([128]));
        assert!(cascade.detect_image(&flat, &params).is_empty());
    }

    #[test]
    fn test_grouping_on_downscaled_level() {
        let cascade = blob_cascade();
        let img = square_image(120, 50, 20);
        let params = DetectParams {
            scale_factor: 2.0,
            min_neighbors: 1,
            min_size: Size::new(40, 40),
            max_size: Some(Size::new(40, 40)),
        };
        let grouped = cascade.detect_image(&img, &params);
        assert_eq!(grouped.len(), 1);
        let r = grouped[0];
        assert_eq!((r.width, r.height), (40, 40));
        assert!((36..=44).contains(&r.x) && (36..=44).contains(&r.y), "{r:?}");
    }

    #[test]
    fn test_tilted_feature_fires_on_diagonal_edge() {
        // Two diamonds stacked along the down-left diagonal; they cancel on
        // flat patches.
        let xml = stump_cascade(8, &["4 0 2 2 1.", "2 2 2 2 -1."], true);
        let cascade = HaarCascade::from_xml_str(&xml).unwrap();
        assert!(cascade.summary().tilted);
        let params = DetectParams {
            scale_factor: 1.3,
            min_neighbors: 0,
            min_size: Size::new(8, 8),
            max_size: Some(Size::new(8, 8)),
        };

        let edge = GrayImage::from_fn(24, 24, |x, y| image::Luma([if x >= y { 255 } else { 0 }]));
        let hits = cascade.detect_image(&edge, &params);
        assert!(!hits.is_empty());
        for hit in &hits {
            assert!((hit.x - hit.y).abs() <= 2, "unexpected hit {hit:?}");
        }

        let flat = GrayImage::from_pixel(24, 24, image::Luma([128]));
        assert!(cascade.detect_image(&flat, &params).is_empty());
    }

    #[test]
    fn test_invalid_params_refused() {
        let cascade = HaarCascade::from_xml_str(EDGE_CASCADE).unwrap();
        let mut params = single_scale();
        params.scale_factor = 0.9;
        assert!(cascade.detect_image(&edge_image(), &params).is_empty());
    }

    #[test]
    fn test_pyramid_scales_respect_bounds() {
        let cascade = HaarCascade::from_xml_str(EDGE_CASCADE).unwrap();
        let mut params = DetectParams {
            scale_factor: 2.0,
            min_neighbors: 0,
            min_size: Size::new(6, 6),
            max_size: None,
        };
        // Windows 6, 12, 24, 48; 96 exceeds the 60x60 image.
        assert_eq!(cascade.pyramid_scales(60, 60, &params), vec![1.0, 2.0, 4.0, 8.0]);

        params.min_size = Size::new(20, 20);
        assert_eq!(cascade.pyramid_scales(60, 60, &params), vec![4.0, 8.0]);

        params.max_size = Some(Size::new(30, 30));
        assert_eq!(cascade.pyramid_scales(60, 60, &params), vec![4.0]);

        // Image smaller than the base window.
        assert!(cascade.pyramid_scales(5, 5, &single_scale()).is_empty());
    }

    #[test]
    fn test_legacy_tilted_weights_are_halved() {
        let xml = EDGE_CASCADE_LEGACY
            .replace("<_>0 0 6 6 -1.</_>", "<_>3 0 2 2 -1.</_>")
            .replace("<_>0 3 6 3 2.</_>", "<_>3 1 1 1 2.</_>")
            .replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        let cascade = HaarCascade::from_xml_str(&xml).unwrap();
        assert!(cascade.summary().tilted);
        let weights: Vec<f64> = cascade.features[0].rects.iter().map(|r| r.weight).collect();
        assert_eq!(weights, vec![-0.5, 1.0]);
    }

    #[test]
    fn test_rejects_lbp_cascade() {
        let xml = EDGE_CASCADE.replace(
            "<featureType>HAAR</featureType>",
            "<featureType>LBP</featureType>",
        );
        assert!(matches!(
            HaarCascade::from_xml_str(&xml),
            Err(CascadeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_rejects_feature_outside_window() {
        let xml = EDGE_CASCADE.replace("0 3 6 3 2.", "0 4 6 3 2.");
        assert!(matches!(
            HaarCascade::from_xml_str(&xml),
            Err(CascadeError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_dangling_feature_index() {
        let xml = EDGE_CASCADE.replace("0 -1 0 1.0000000149011612e-01", "0 -1 3 0.1");
        assert!(matches!(
            HaarCascade::from_xml_str(&xml),
            Err(CascadeError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_document() {
        let truncated = &EDGE_CASCADE[..EDGE_CASCADE.len() / 2];
        assert!(HaarCascade::from_xml_str(truncated).is_err());
        assert!(HaarCascade::from_xml_str("not a cascade").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = HaarCascade::load("/nonexistent/haarcascade_mcs_nose.xml");
        assert!(matches!(result, Err(CascadeError::NotFound(_))));
    }
}
