//! Runtime image assembly
//!
//! Resolves a base image, installs runtime libraries, places the build
//! artifact and publishes a self-contained image directory. Also renders an
//! equivalent Dockerfile for container builders.

pub mod assemble;
pub mod base;
pub mod dockerfile;
pub mod packages;

pub use assemble::{labels, ImageConfig, RuntimeAssembler, RuntimeImage, IMAGE_CONFIG_FILE};
pub use base::{BaseImage, BaseImageProvider, DirectoryImageProvider};
pub use dockerfile::{generate_dockerfile, DockerfileOptions};
pub use packages::{DirectoryPackageInstaller, PackageInstaller};
