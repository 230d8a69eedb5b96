use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Width every eraser stroke is drawn with, whatever the configured pen width.
pub const ERASER_WIDTH: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    Eraser,
}

/// One committed freehand gesture.
///
/// Strokes are frozen once committed. Anything that looks like an edit (clearing a surface,
/// loading a new document) replaces whole sequences of strokes instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    points: Vec<Point>,
    color: String,
    line_width: f32,
    tool: Tool,
}

impl Stroke {
    pub fn new(points: Vec<Point>, settings: &ToolSettings) -> Self {
        Self {
            points,
            color: settings.color.clone(),
            line_width: settings.line_width,
            tool: settings.tool,
        }
    }

    pub fn pen(points: Vec<Point>, color: impl Into<String>, line_width: f32) -> Self {
        Self { points, color: color.into(), line_width, tool: Tool::Pen }
    }

    pub fn eraser(points: Vec<Point>) -> Self {
        Self {
            points,
            color: ToolSettings::default().color,
            line_width: ERASER_WIDTH,
            tool: Tool::Eraser,
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn line_width(&self) -> f32 {
        self.line_width
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Width the stroke is actually painted with.
    pub fn effective_width(&self) -> f32 {
        effective_width(self.tool, self.line_width)
    }

    /// A stroke with fewer than two points draws nothing and is never committed.
    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 2
    }
}

pub fn effective_width(tool: Tool, line_width: f32) -> f32 {
    match tool {
        Tool::Pen => line_width,
        Tool::Eraser => ERASER_WIDTH,
    }
}

/// Live drawing configuration, handed down to every surface by the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSettings {
    pub tool: Tool,
    pub color: String,
    pub line_width: f32,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self { tool: Tool::Pen, color: "#000000".to_owned(), line_width: 3.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationMode {
    #[default]
    Whiteboard,
    Pdf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub tool: ToolSettings,
    /// Logical width, in CSS pixels, that PDF pages are laid out and rendered at.
    pub page_render_width: u32,
    pub device_pixel_ratio: f32,
    pub whiteboard_width: u32,
    pub whiteboard_height: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            tool: ToolSettings::default(),
            page_render_width: 800,
            device_pixel_ratio: 1.0,
            whiteboard_width: 1280,
            whiteboard_height: 800,
        }
    }
}

/// Page number (1-based) to committed strokes for a loaded PDF.
///
/// Sequences are replaced wholesale and shared as immutable slices, so a snapshot is a cheap
/// point-in-time copy that later commits never reach.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationStore {
    pages: BTreeMap<u32, Arc<[Stroke]>>,
}

pub type AnnotationSnapshot = AnnotationStore;

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, page_number: u32) -> Arc<[Stroke]> {
        self.pages.get(&page_number).cloned().unwrap_or_else(|| Arc::from(Vec::<Stroke>::new()))
    }

    /// Replaces the full sequence for one page. Never merges; an empty sequence drops the page.
    pub fn set(&mut self, page_number: u32, strokes: impl Into<Arc<[Stroke]>>) {
        let strokes = strokes.into();
        if strokes.is_empty() {
            self.pages.remove(&page_number);
        } else {
            self.pages.insert(page_number, strokes);
        }
    }

    pub fn clear_all(&mut self) {
        self.pages.clear();
    }

    /// Drops every page; called when a different document is loaded.
    pub fn reset(&mut self) {
        self.clear_all();
    }

    pub fn pages_with_strokes(&self) -> impl Iterator<Item = (u32, &[Stroke])> + '_ {
        self.pages.iter().map(|(page, strokes)| (*page, strokes.as_ref()))
    }

    pub fn stroke_count(&self) -> usize {
        self.pages.values().map(|strokes| strokes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn snapshot(&self) -> AnnotationSnapshot {
        self.clone()
    }
}

/// Serialized stroke input: the whiteboard surface plus per-page sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokeScript {
    pub whiteboard: Vec<Stroke>,
    pub pages: BTreeMap<u32, Vec<Stroke>>,
}

impl StrokeScript {
    pub fn to_store(&self) -> AnnotationStore {
        let mut store = AnnotationStore::new();
        for (page, strokes) in &self.pages {
            let committed: Vec<Stroke> =
                strokes.iter().filter(|stroke| !stroke.is_degenerate()).cloned().collect();
            store.set(*page, committed);
        }
        store
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationAction {
    DocumentLoaded,
    SetPage { page_number: u32, strokes: Vec<Stroke> },
    ClearAll,
}

pub fn apply_annotation_action(store: &mut AnnotationStore, action: AnnotationAction) {
    match action {
        AnnotationAction::DocumentLoaded => store.reset(),
        AnnotationAction::ClearAll => store.clear_all(),
        AnnotationAction::SetPage { page_number, strokes } => store.set(page_number, strokes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red_line() -> Stroke {
        Stroke::pen(vec![Point::new(10.0, 10.0), Point::new(50.0, 50.0)], "#ff0000", 3.0)
    }

    #[test]
    fn eraser_width_ignores_configured_width() {
        let settings =
            ToolSettings { tool: Tool::Eraser, color: "#00ff00".to_owned(), line_width: 2.0 };
        let stroke = Stroke::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)], &settings);

        assert_eq!(stroke.line_width(), 2.0);
        assert_eq!(stroke.effective_width(), ERASER_WIDTH);
    }

    #[test]
    fn single_point_stroke_is_degenerate() {
        let stroke = Stroke::pen(vec![Point::new(1.0, 1.0)], "#000", 3.0);
        assert!(stroke.is_degenerate());
        assert!(!red_line().is_degenerate());
    }

    #[test]
    fn missing_page_reads_as_empty() {
        let store = AnnotationStore::new();
        assert!(store.get(7).is_empty());
    }

    #[test]
    fn setting_one_page_leaves_neighbours_alone() {
        let mut store = AnnotationStore::new();
        store.set(2, vec![red_line()]);
        store.set(4, vec![red_line(), red_line()]);

        let before_two = store.get(2);
        let before_four = store.get(4);

        store.set(3, vec![red_line()]);

        assert_eq!(store.get(2), before_two);
        assert_eq!(store.get(4), before_four);
        assert_eq!(store.get(3).len(), 1);
    }

    #[test]
    fn set_replaces_instead_of_merging() {
        let mut store = AnnotationStore::new();
        store.set(1, vec![red_line(), red_line()]);
        store.set(1, vec![red_line()]);

        assert_eq!(store.get(1).len(), 1);
    }

    #[test]
    fn empty_sequence_removes_page_entry() {
        let mut store = AnnotationStore::new();
        store.set(1, vec![red_line()]);
        store.set(1, Vec::<Stroke>::new());

        assert!(store.is_empty());
        assert_eq!(store.pages_with_strokes().count(), 0);
    }

    #[test]
    fn snapshot_does_not_observe_later_commits() {
        let mut store = AnnotationStore::new();
        store.set(1, vec![red_line()]);

        let snapshot = store.snapshot();
        store.set(1, vec![red_line(), red_line()]);
        store.set(2, vec![red_line()]);

        assert_eq!(snapshot.get(1).len(), 1);
        assert!(snapshot.get(2).is_empty());
    }

    #[test]
    fn loading_a_document_resets_the_store() {
        let mut store = AnnotationStore::new();
        apply_annotation_action(
            &mut store,
            AnnotationAction::SetPage { page_number: 1, strokes: vec![red_line()] },
        );
        assert_eq!(store.stroke_count(), 1);

        apply_annotation_action(&mut store, AnnotationAction::DocumentLoaded);
        assert!(store.is_empty());
    }

    #[test]
    fn stroke_script_parses_camel_case_json() {
        let json = r##"{
            "pages": {
                "1": [
                    {
                        "points": [{"x": 10, "y": 10}, {"x": 50, "y": 50}],
                        "color": "#ff0000", "lineWidth": 3, "tool": "pen"
                    },
                    {
                        "points": [{"x": 5, "y": 5}],
                        "color": "#ff0000", "lineWidth": 3, "tool": "pen"
                    }
                ]
            }
        }"##;

        let script: StrokeScript = serde_json::from_str(json).expect("script should parse");
        assert!(script.whiteboard.is_empty());

        let store = script.to_store();
        assert_eq!(store.get(1).as_ref(), &[red_line()]);
    }

    #[test]
    fn preferences_fill_missing_fields_with_defaults() {
        let prefs: Preferences =
            serde_json::from_str(r#"{ "pageRenderWidth": 640 }"#).expect("prefs should parse");

        assert_eq!(prefs.page_render_width, 640);
        assert_eq!(prefs.device_pixel_ratio, 1.0);
        assert_eq!(prefs.tool, ToolSettings::default());
    }
}
