//! Compile stages: stub generation, the two-pass compiler and extraction

pub mod compiler;
pub mod extract;
pub mod stub;
pub mod toolchain;
pub mod workspace;

pub use compiler::{classify_failure, ArtifactBuild, CompilerStage};
pub use extract::{extract, BuildArtifact};
pub use stub::{StubProgram, STUB_MARKER};
pub use toolchain::{
    CargoToolchain, CompileOutput, CompileRequest, CompileSettings, Pass, Toolchain,
};
pub use workspace::BuildWorkspace;
