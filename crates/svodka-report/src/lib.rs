//! Report core: chunking, the map-reduce summarization pipeline, Telegram
//! rendering, platform-safe splitting and the daily orchestrator.

pub mod chunker;
pub mod pipeline;
pub mod render;
pub mod service;
pub mod split;

pub use chunker::{chunk_messages, Chunk, DEFAULT_GAP_MINUTES};
pub use pipeline::{PipelineConfig, ReportPipeline};
pub use render::{render_executive_chat, render_executive_digest, render_report_bag};
pub use service::ReportService;
pub use split::{split_for_platform, DEFAULT_BUDGET};
