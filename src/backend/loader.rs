// loader.rs - Reference-counted native library loader

//! Backend loader.
//!
//! A decoding library is made of one or more components (shared objects).
//! The first [`BackendLoader::load`] opens each component, resolves every
//! symbol the backend needs and checks the component's ABI version against
//! the one the backend was built for. Either all of that succeeds and the
//! resolved [`CodecLibrary`] is published, or everything opened so far is
//! released again. Later loads only bump the reference count; the library
//! is released when the count drops back to zero.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::codec::CodecLibrary;
use crate::error::{MusicError, MusicResult};

/// Packed `major.minor.micro` version, `major << 16 | minor << 8 | micro`
pub type AbiVersion = u32;

pub const fn abi_version(major: u32, minor: u32, micro: u32) -> AbiVersion {
    (major << 16) | (minor << 8) | micro
}

pub const fn abi_major(version: AbiVersion) -> u32 {
    version >> 16
}

pub fn format_version(version: AbiVersion) -> String {
    format!(
        "{}.{}.{}",
        version >> 16,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

/// One shared object a backend depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSpec {
    pub name: &'static str,
    /// Version the backend was built against
    pub compiled: AbiVersion,
    /// Symbols that must resolve
    pub symbols: &'static [&'static str],
}

/// An opened shared object. Dropping it releases the handle.
pub trait SharedObject: Send + Sync {
    /// True if `symbol` resolves in this object
    fn lookup(&self, symbol: &str) -> bool;

    /// Version reported by the object at runtime
    fn version(&self) -> AbiVersion;
}

/// Where a backend's components come from
pub trait LibraryProvider: Send + Sync {
    fn components(&self) -> &[ComponentSpec];

    fn open(&self, component: &ComponentSpec) -> Result<Box<dyn SharedObject>, String>;

    /// Build the function table once every component checked out.
    fn bind(&self, objects: &[Box<dyn SharedObject>]) -> Result<Arc<dyn CodecLibrary>, String>;
}

#[derive(Default)]
struct LoaderState {
    refcount: u32,
    objects: Vec<Box<dyn SharedObject>>,
    library: Option<Arc<dyn CodecLibrary>>,
}

/// Reference-counted owner of one backend's function table
pub struct BackendLoader {
    name: &'static str,
    provider: Box<dyn LibraryProvider>,
    state: Mutex<LoaderState>,
}

impl BackendLoader {
    pub fn new(name: &'static str, provider: Box<dyn LibraryProvider>) -> Self {
        Self {
            name,
            provider,
            state: Mutex::new(LoaderState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take a reference on the library, loading it on first use.
    ///
    /// A failed load leaves the reference count untouched.
    pub fn load(&self) -> MusicResult<()> {
        let mut state = self.state.lock();
        if state.refcount == 0 {
            let (objects, library) = self.resolve().map_err(MusicError::report)?;
            state.objects = objects;
            state.library = Some(library);
            log::info!("{}: library loaded", self.name);
        }
        state.refcount += 1;
        Ok(())
    }

    /// Drop a reference; the library is released when none are left.
    pub fn unload(&self) {
        let mut state = self.state.lock();
        match state.refcount {
            0 => {
                log::debug!("{}: unload without matching load ignored", self.name);
            }
            1 => {
                state.library = None;
                // Release in reverse opening order
                while let Some(object) = state.objects.pop() {
                    drop(object);
                }
                state.refcount = 0;
                log::info!("{}: library released", self.name);
            }
            _ => state.refcount -= 1,
        }
    }

    pub fn refcount(&self) -> u32 {
        self.state.lock().refcount
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().library.is_some()
    }

    /// The resolved function table, while loaded
    pub fn library(&self) -> Option<Arc<dyn CodecLibrary>> {
        self.state.lock().library.clone()
    }

    /// Load and return a guard that unloads when dropped.
    pub fn acquire(self: &Arc<Self>) -> MusicResult<BackendLease> {
        self.load()?;
        match self.library() {
            Some(library) => Ok(BackendLease {
                loader: Arc::clone(self),
                library,
            }),
            None => {
                self.unload();
                Err(MusicError::BackendUnavailable(format!("{}: library not loaded", self.name))
                    .report())
            }
        }
    }

    /// Open and check every component. On error the objects opened so
    /// far are dropped before returning.
    fn resolve(&self) -> MusicResult<(Vec<Box<dyn SharedObject>>, Arc<dyn CodecLibrary>)> {
        let mut objects: Vec<Box<dyn SharedObject>> = Vec::new();

        for component in self.provider.components() {
            let object = self.provider.open(component).map_err(|e| {
                MusicError::BackendUnavailable(format!(
                    "{}: failed to open {}: {}",
                    self.name, component.name, e
                ))
            })?;

            if let Some(missing) = component.symbols.iter().find(|s| !object.lookup(s)) {
                log::warn!("{}: missing symbol {} in {}", self.name, missing, component.name);
                return Err(MusicError::BackendUnavailable(format!(
                    "{}: missing symbol '{}' in {}",
                    self.name, missing, component.name
                )));
            }

            let found = object.version();
            if abi_major(found) != abi_major(component.compiled) {
                log::error!(
                    "{}: INCOMPATIBLE ABI of {}: compiled {}, loaded {}",
                    self.name,
                    component.name,
                    format_version(component.compiled),
                    format_version(found)
                );
                return Err(MusicError::BackendUnavailable(format!(
                    "{}: incompatible ABI of {} (compiled {}, loaded {})",
                    self.name,
                    component.name,
                    format_version(component.compiled),
                    format_version(found)
                )));
            }
            if found != component.compiled {
                log::warn!(
                    "{}: version of {} does not match: compiled {}, loaded {}",
                    self.name,
                    component.name,
                    format_version(component.compiled),
                    format_version(found)
                );
            }

            objects.push(object);
        }

        let library = self.provider.bind(&objects).map_err(|e| {
            MusicError::BackendUnavailable(format!("{}: failed to bind library: {}", self.name, e))
        })?;
        Ok((objects, library))
    }
}

impl std::fmt::Debug for BackendLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLoader")
            .field("name", &self.name)
            .field("refcount", &self.refcount())
            .finish()
    }
}

/// One reference on a loaded backend library
pub struct BackendLease {
    loader: Arc<BackendLoader>,
    library: Arc<dyn CodecLibrary>,
}

impl BackendLease {
    pub fn library(&self) -> &Arc<dyn CodecLibrary> {
        &self.library
    }

    pub fn loader(&self) -> &Arc<BackendLoader> {
        &self.loader
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.loader.unload();
    }
}
