// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A layered, content-addressed block storage engine for container root
//! filesystems backed by OCI registries.
//!
//! ##### About
//!
//! A logical block device is represented as a stack of LSMT layers: one
//! mutable, append-only `rw` layer on top of zero or more sealed,
//! immutable `ro` layers below it. Each layer's logical-to-physical
//! mapping is held in a [`layer_index`]; sealed layers additionally store
//! their data compressed in a [`zfile`] container. Remote layers are
//! fetched through a [`blob_source::BlobSource`] and cached locally by a
//! [`block_cache::BlockCache`]. [`compactor`] flattens a stack of layers
//! into a single new sealed layer.
//!
//! # Example usage
//!
//! ```
//! use lsm_tree::{Engine, EngineConfig};
//! # let folder = tempfile::tempdir()?;
//!
//! let engine = Engine::new(EngineConfig::new(folder.path()))?;
//! let layer = engine.create_rw_layer("root", 1 << 20)?;
//!
//! layer.pwrite(&[0xAB; 512], 0)?;
//! let mut buf = [0u8; 512];
//! layer.pread(&mut buf, 0)?;
//! assert_eq!([0xAB; 512], buf);
//! #
//! # Ok::<(), lsm_tree::Error>(())
//! ```

#![doc(html_logo_url = "https://raw.githubusercontent.com/fjall-rs/lsm-tree/main/logo.png")]
#![doc(html_favicon_url = "https://raw.githubusercontent.com/fjall-rs/lsm-tree/main/logo.png")]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

pub mod binary_search;
pub mod blob_source;
pub mod block_cache;
pub mod checksum;
pub mod coding;
pub mod compactor;
pub mod compression;
mod config;
pub mod descriptor_table;
mod engine;
mod error;
pub mod file;
pub mod fs;
pub mod layer_index;
pub mod lsmt;
mod path;
pub mod segment;
pub mod zfile;

pub use {
    checksum::crc32c,
    coding::{Decode, DecodeError, Encode, EncodeError},
    compactor::Compactor,
    compression::CompressionType,
    config::EngineConfig,
    engine::{Engine, EngineObserver},
    error::{Error, Result},
    lsmt::{RoLayer, RwLayer},
    segment::{Segment, SegmentMapping},
};
