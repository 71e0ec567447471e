//! Per-identity session state: artifact binding and surface rebuilds.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::HarnessError;
use crate::identity;
use crate::introspect;
use crate::loader;
use crate::script::{Module, Value};
use crate::store::{ArtifactStore, Variant};
use crate::surface::CallableSurface;
use crate::toolchain::Toolchain;

/// What the latest upload for an identity was, i.e. how to rebuild its
/// surface.
#[derive(Debug, Clone)]
struct ArtifactMeta {
    variant: Variant,
    /// Compiled-unit reference established during upload
    unit: Option<String>,
}

struct IdentitySlot {
    /// Serializes surface rebuilds (uploads and binds) for one identity;
    /// dispatch over an already-bound surface never takes this.
    rebuild: tokio::sync::Mutex<()>,
    meta: parking_lot::Mutex<Option<ArtifactMeta>>,
}

/// Registry shared by all connections. Owns the artifact store and the
/// toolchain; hands out one [`Session`] per bind.
pub struct SessionMap {
    store: Arc<ArtifactStore>,
    toolchain: Arc<Toolchain>,
    slots: parking_lot::Mutex<HashMap<String, Arc<IdentitySlot>>>,
}

impl SessionMap {
    pub fn new(store: Arc<ArtifactStore>, toolchain: Arc<Toolchain>) -> Self {
        Self {
            store,
            toolchain,
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, identity: &str) -> Arc<IdentitySlot> {
        let mut slots = self.slots.lock();
        slots
            .entry(identity.to_string())
            .or_insert_with(|| {
                Arc::new(IdentitySlot {
                    rebuild: tokio::sync::Mutex::new(()),
                    meta: parking_lot::Mutex::new(None),
                })
            })
            .clone()
    }

    /// Ingests one upload: persists the artifact, runs the variant's
    /// pipeline, and returns the freshly built surface for the caller to
    /// render. Replaces whatever the identity had before; any previously
    /// derived surface is invalid from here on (sessions rebuild on
    /// bind, so they pick that up).
    pub async fn register_upload(
        &self,
        identity: &str,
        variant: Variant,
        filename: &str,
        bytes: &[u8],
    ) -> Result<CallableSurface, HarnessError> {
        let slot = self.slot(identity);
        let _rebuild = slot.rebuild.lock().await;

        let saved = self.store.save(identity, variant, filename, bytes)?;
        // The save just replaced the identity's artifact. Until the new
        // pipeline completes, the slot must not keep pointing at the
        // overwritten one, so a failure below leaves the identity unbound.
        *slot.meta.lock() = None;
        let surface = match variant {
            Variant::Interpreted => {
                let module = loader::load(&self.store, identity)?;
                introspect::surface_of_module(&module)
            }
            Variant::Compiled => {
                let unit = saved
                    .unit
                    .as_deref()
                    .ok_or_else(|| HarnessError::ingest("missing compiled unit name"))?;
                let source_file = saved
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| HarnessError::ingest("missing source file name"))?;
                let dir = self.store.unit_dir(identity);

                self.toolchain.compile(&dir, &source_file).await?;
                self.toolchain.analyze(&dir, unit).await?
            }
        };

        *slot.meta.lock() = Some(ArtifactMeta {
            variant,
            unit: saved.unit,
        });
        log::info!(
            "{identity} uploaded a {variant:?} artifact with {} method(s)",
            surface.len()
        );
        Ok(surface)
    }

    /// Binds a connection's identity to its latest artifact, re-deriving
    /// the surface. Fails with a dispatch diagnostic when the identity
    /// has never completed an upload.
    pub async fn bind(&self, identity: &str) -> Result<Session, HarnessError> {
        if !identity::is_valid(identity) {
            return Err(HarnessError::dispatch("invalid identity token"));
        }

        let slot = self.slot(identity);
        let _rebuild = slot.rebuild.lock().await;

        let meta = slot
            .meta
            .lock()
            .clone()
            .ok_or_else(|| HarnessError::dispatch("no artifact bound"))?;

        match meta.variant {
            Variant::Interpreted => {
                let module = loader::load(&self.store, identity)?;
                let surface = introspect::surface_of_module(&module);
                Ok(Session {
                    identity: identity.to_string(),
                    surface,
                    executor: Executor::Script(module),
                })
            }
            Variant::Compiled => {
                let unit = meta
                    .unit
                    .ok_or_else(|| HarnessError::dispatch("no artifact bound"))?;
                let work_dir = self.store.unit_dir(identity);
                let surface = self.toolchain.analyze(&work_dir, &unit).await?;
                Ok(Session {
                    identity: identity.to_string(),
                    surface,
                    executor: Executor::Unit {
                        unit,
                        work_dir,
                        toolchain: self.toolchain.clone(),
                    },
                })
            }
        }
    }
}

#[derive(Debug)]
enum Executor {
    /// Interpreted artifact, invoked in-process
    Script(Module),
    /// Compiled unit, delegated to the external runner
    Unit {
        unit: String,
        work_dir: PathBuf,
        toolchain: Arc<Toolchain>,
    },
}

/// One identity bound to one artifact version's surface for the duration
/// of a connection. The surface is immutable; concurrent invocations are
/// fine.
#[derive(Debug)]
pub struct Session {
    pub identity: String,
    pub surface: CallableSurface,
    executor: Executor,
}

impl Session {
    /// Invokes a method and returns the textual form of its result.
    /// `expected` is forwarded to the compiled pipeline's runner, which
    /// needs it to generate the test.
    pub async fn invoke(
        &self,
        method: &str,
        expected: &str,
        args: &[serde_json::Value],
    ) -> Result<String, HarnessError> {
        match &self.executor {
            Executor::Script(module) => {
                let values = args
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(HarnessError::dispatch)?;
                module
                    .call(method, &values)
                    .map(|value| value.to_string())
                    .map_err(|e| HarnessError::invoke(e.to_string()))
            }
            Executor::Unit {
                unit,
                work_dir,
                toolchain,
            } => {
                toolchain
                    .run_case(work_dir, unit, method, expected, args)
                    .await
            }
        }
    }
}
