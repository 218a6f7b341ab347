//! Data contracts shared by the inkframe engine and CLI.

pub mod bundle;
pub mod error;
pub mod events;
pub mod panels;

pub use bundle::{panel_file_name, Bundle, BundleNames};
pub use error::{ComicError, ProviderError};
pub use events::{ComicEvent, EventWriter};
pub use panels::{
    parse_prompt_list, truncate_caption, PanelDescriptor, PanelMode, PanelPrompt, PanelSet,
    RenderResult,
};
