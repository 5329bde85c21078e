//! Launch plan synthesis for the uplink broadcaster.
//!
//! Turns a validated session into one encoder invocation per service, a
//! time-signal injector and a multiplexer driving the hardware output,
//! together with the auxiliary files those commands read. Synthesis only
//! computes; it never spawns processes or touches the filesystem.

mod concat;
mod encoder;
mod error;
mod multiplexer;
mod render;
mod synth;

pub use concat::{
    parse_concat_list, read_concat_list, refresh_concat_items, render_concat_list,
};
pub use error::{ConcatError, ExportError, SynthesisError};
pub use multiplexer::TIME_SIGNAL_BITRATE;
pub use render::{export_script, render_script, ScriptFormat};
pub use synth::{
    playlist_path, synthesize, SynthesisContext, ANALYSIS_FILE_NAME, DEFAULT_PORT_BASE,
    GUIDE_FILE_NAME,
};
