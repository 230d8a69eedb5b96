//! InkPaper core library
//!
//! Freehand annotation capture, raster compositing and flattened PDF export.

pub mod compositor;
pub mod export;
pub mod raster;
pub mod surface;
pub mod workspace;

pub use compositor::{flatten, white_base};
pub use export::{export_pdf, export_pdf_default, page_overlay, ExportError, ExportOptions};
pub use raster::{encode_png, parse_color, Ink, Raster, RasterSnapshot};
pub use surface::{CaptureState, SurfaceController, SurfaceGeometry};
pub use workspace::{DocumentState, LoadedDocument, Workspace, WorkspaceError};
