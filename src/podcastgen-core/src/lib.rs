//! PodcastGen Core Library
//!
//! Turns `[SPEAKER|emotion] text` scripts into a single podcast episode:
//! parsing, emotion prosody, voice resolution, concurrent synthesis,
//! lossless assembly and an optional mastering chain.

pub mod audio;
pub mod config;
pub mod error;
pub mod mastering;
pub mod pipeline;
pub mod prosody;
pub mod script;
pub mod script_gen;
pub mod synthesis;
pub mod voices;

pub use audio::{AssemblyPiece, AudioClip, AudioFormat, PauseSpec, assemble};
pub use config::{Config, Provider, default_config};
pub use error::{ParseError, ParseErrorKind, PodcastError, Result};
pub use mastering::{MasteringChain, MasteringConfig};
pub use pipeline::{
    GenerationCallback, GenerationEvent, GenerationRequest, PodcastGenerator, PodcastOutput,
    ScriptSource,
};
pub use prosody::{ProsodySpec, ProsodyTable};
pub use script::{Script, Segment, Statistics};
pub use script_gen::{ScriptGenerator, ScriptRequirements, Tone};
pub use synthesis::{FailureMode, SpeechSynthesizer, SynthesisRequest};
pub use voices::{VoiceAssignment, VoiceRoster};
