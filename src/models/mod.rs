mod pause;
mod session;

pub use pause::Pause;
pub use session::{
    IfPreset, Session, SessionInfo, SessionKind, SessionStatus, SessionType, IF_PRESETS,
};
