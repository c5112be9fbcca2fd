// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `Engine`: the owned context a caller constructs once and threads
//! through layer construction, replacing the source's process-wide
//! singletons (loggers, cache handles, exporter) with one explicit value
//! (`spec.md` §9 DESIGN NOTE "Global state").

use crate::config::EngineConfig;
use crate::descriptor_table::DescriptorTable;
use crate::fs::{FileSystem, StdFileSystem};
use crate::lsmt::{RoLayer, RwLayer};
use std::sync::Arc;
use uuid::Uuid;

/// Observation hook for engine lifecycle events. All methods are no-ops by
/// default; implement the ones a caller's logging/metrics layer cares
/// about (`spec.md` §1 Non-goals: "metrics export... audit logging" are
/// collaborator concerns, not core ones).
pub trait EngineObserver: Send + Sync {
    /// A RW layer was sealed into a new RO layer.
    fn on_layer_sealed(&self, _uuid: Uuid) {}

    /// A RW layer was compacted/committed into a new RO layer.
    fn on_layer_committed(&self, _uuid: Uuid) {}

    /// A ZFile block failed its CRC32C check (after the one built-in
    /// retry, this is reported purely for observability).
    fn on_checksum_mismatch(&self, _block: u64) {}
}

#[derive(Debug, Default)]
struct NoopObserver;
impl EngineObserver for NoopObserver {}

/// Owns the shared state a set of layers under one root directory need:
/// configuration, an open-file-descriptor budget, and an observer hook.
pub struct Engine {
    config: EngineConfig,
    descriptor_table: DescriptorTable,
    observer: Arc<dyn EngineObserver>,
}

impl Engine {
    /// Creates an engine with a no-op observer, ensuring `config.root`
    /// exists.
    pub fn new(config: EngineConfig) -> crate::Result<Self> {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    /// Creates an engine with a caller-supplied observer.
    pub fn with_observer(config: EngineConfig, observer: Arc<dyn EngineObserver>) -> crate::Result<Self> {
        if config.max_io_size % 4096 != 0 {
            return Err(crate::Error::InvalidArgument("max_io_size must be a multiple of 4096"));
        }

        StdFileSystem::create_dir_all(&config.root).map_err(crate::Error::Io)?;
        let descriptor_table = DescriptorTable::new(config.descriptor_table_capacity);
        Ok(Self {
            config,
            descriptor_table,
            observer,
        })
    }

    /// This engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// This engine's shared file-descriptor cache.
    #[must_use]
    pub fn descriptor_table(&self) -> &DescriptorTable {
        &self.descriptor_table
    }

    fn layer_data_path(&self, name: &str) -> std::path::PathBuf {
        self.config.root.join(format!("{name}.data"))
    }

    fn layer_index_path(&self, name: &str) -> std::path::PathBuf {
        self.config.root.join(format!("{name}.index"))
    }

    /// Creates a fresh, bottommost RW layer named `name` under
    /// `config.root`.
    pub fn create_rw_layer(&self, name: &str, virtual_size: u64) -> crate::Result<RwLayer> {
        self.create_child_rw_layer(name, virtual_size, Uuid::nil())
    }

    /// Creates a RW layer atop `parent`, chaining `parent_uuid` so the
    /// stack's UUID chain validates (`spec.md` §3, §4.2).
    pub fn create_rw_layer_atop(&self, name: &str, virtual_size: u64, parent: &RoLayer) -> crate::Result<RwLayer> {
        self.create_child_rw_layer(name, virtual_size, parent.uuid())
    }

    fn create_child_rw_layer(&self, name: &str, virtual_size: u64, parent_uuid: Uuid) -> crate::Result<RwLayer> {
        RwLayer::create::<StdFileSystem>(
            &self.layer_data_path(name),
            Some(&self.layer_index_path(name)),
            virtual_size,
            Uuid::new_v4(),
            parent_uuid,
            self.config.max_io_size,
            self.config.group_commit_capacity,
        )
    }

    /// Opens an existing sealed RO layer named `name`.
    pub fn open_ro_layer(&self, name: &str) -> crate::Result<RoLayer> {
        RoLayer::open::<StdFileSystem>(&self.layer_data_path(name), self.config.max_io_size)
    }

    /// Seals `layer` in place, producing the equivalent RO layer
    /// (`spec.md` §4.3 `close_seal`).
    pub fn seal(&self, mut layer: RwLayer) -> crate::Result<RoLayer> {
        let sealed = layer
            .close_seal::<StdFileSystem>(true)?
            .ok_or_else(|| crate::Error::Corrupt("close_seal(reopen=true) returned no layer".into()))?;
        self.observer.on_layer_sealed(sealed.uuid());
        Ok(sealed)
    }

    /// Compacts `layer`'s current content into a brand-new RO layer named
    /// `name` (`spec.md` §4.3 `commit`).
    pub fn commit(&self, layer: &RwLayer, name: &str) -> crate::Result<RoLayer> {
        let ro = layer.commit::<StdFileSystem>(&self.layer_data_path(name))?;
        self.observer.on_layer_committed(ro.uuid());
        Ok(ro)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn create_seal_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(EngineConfig::new(dir.path())).unwrap();

        let layer = engine.create_rw_layer("root", 1 << 20).unwrap();
        layer.pwrite(&[0xAB; 512], 0).unwrap();

        let sealed = engine.seal(layer).unwrap();
        assert_eq!(1 << 20, sealed.virtual_size());

        let mut buf = [0u8; 512];
        sealed.pread(&mut buf, 0).unwrap();
        assert_eq!([0xAB; 512], buf);

        let reopened = engine.open_ro_layer("root").unwrap();
        assert_eq!(sealed.uuid(), reopened.uuid());
    }

    #[test]
    fn rejects_unaligned_max_io_size() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(dir.path()).with_max_io_size(4097);
        let err = Engine::new(config).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidArgument(_)));
    }

    #[test]
    fn child_layer_chains_parent_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(EngineConfig::new(dir.path())).unwrap();

        let base = engine.create_rw_layer("base", 4096).unwrap();
        let base = engine.seal(base).unwrap();

        let child = engine.create_rw_layer_atop("child", 4096, &base).unwrap();
        assert_eq!(base.uuid(), child.parent_uuid());
    }
}
