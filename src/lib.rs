pub mod api;
pub mod config;
pub mod constants;
pub mod engine;
pub mod fallback;
pub mod frame;
pub mod logging;
pub mod reader;
pub mod session;
pub mod store;
pub mod str_utils;
pub mod trace;
pub mod types;

pub use types::*;

pub use api::{ApiClient, ByteStream, ChatTransport};
pub use config::Config;
pub use engine::{ChatEngine, ToastLevel, UiEvent};
pub use session::{StopControl, StreamSession, StreamSignal};
pub use store::{MemoryStore, SessionStore};
pub use trace::TraceStore;
