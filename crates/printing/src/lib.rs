//! Print pagination, page metrics and rendering shared by the GUI and CLI front ends.
//!
//! A [`PrintSession`] collects page sources, the [`pagination`] stage turns them into
//! [`PhysicalPage`]s and the [`PrintManager`] hands those pages to the preview, PDF and
//! native print sinks.
//! 列印分頁、頁面度量與輸出管線。

pub mod audit;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod display;
pub mod drawing;
pub mod enumerator;
pub mod error;
pub mod geometry;
pub mod job;
pub mod metrics;
pub mod native;
pub mod page;
pub mod pagination;
pub mod pdf;
pub mod preview;
pub mod raster;
pub mod render;
pub mod scene;
pub mod session;
pub mod visual;

pub use audit::VisualRenderMetadata;
pub use config::PrintingConfig;
pub use controller::{PrintJobResult, PrintManager, PrintOutput};
pub use diagnostics::{DiagnosticEvent, Diagnostics, SubscriptionId};
pub use display::{DisplayCommand, PrintDisplayList};
pub use drawing::{DrawingContext, Geometry, OpacityMask, Pen};
pub use enumerator::{
    CancellationToken, CompositePageEnumerator, EnumeratorState, PageEnumerator,
    VisualPageEnumerator,
};
pub use error::{ConfigError, PrintError, RenderError};
pub use geometry::{
    Color, Matrix, PixelRect, PixelSize, Point, Rect, RelativePoint, Size, Thickness,
};
pub use job::{Orientation, PageRange, PrintJobId, PrintJobState, PrintOptions};
pub use metrics::{Dpi, PageMetrics, PageSettings};
pub use native::{NativeCapability, NativePrintBackend, NativePrintSettings};
pub use page::{LogicalPage, PhysicalPage};
pub use pagination::{DefaultPaginator, PaginationResult, PaginationSummary, Paginator};
pub use preview::PrintPreview;
pub use raster::{PageBitmap, PixelFormat};
pub use render::PageRenderReport;
pub use scene::{SceneDescription, SceneNode, Shape};
pub use session::{PrintDocument, PrintSession, PrintSessionBuilder};
pub use visual::{PrintHints, Visual, VisualRef};
