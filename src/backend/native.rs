// native.rs - Shared-object library provider

//! Components loaded from shared objects at runtime.
//!
//! Each component is opened with `libloading`, every required symbol is
//! looked up in it, and its runtime version is read by calling an exported
//! `unsigned fn(void)` version function. The objects stay open until the
//! loader releases them.

use std::ffi::c_uint;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::backend::codec::CodecLibrary;
use crate::backend::loader::{
    abi_major, abi_version, AbiVersion, BackendLoader, ComponentSpec, LibraryProvider,
    SharedObject,
};
use crate::backend::symphonia::SymphoniaLibrary;

type VersionFn = unsafe extern "C" fn() -> c_uint;

/// Builds the function table once every component checked out
pub type Binder =
    Box<dyn Fn(&[Box<dyn SharedObject>]) -> Result<Arc<dyn CodecLibrary>, String> + Send + Sync>;

/// Where to find one component and how to ask for its version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeComponent {
    pub spec: ComponentSpec,
    pub path: PathBuf,
    pub version_symbol: &'static str,
}

/// A component opened with `libloading`
pub struct NativeObject {
    library: Library,
    version: AbiVersion,
}

impl NativeObject {
    /// Open `component` and read its version.
    pub fn open(component: &NativeComponent) -> Result<Self, String> {
        // SAFETY: running a library's initialisers is inherent to loading it.
        let library = unsafe { Library::new(&component.path) }
            .map_err(|e| format!("{}: {}", component.path.display(), e))?;

        // SAFETY: the version symbol is an `unsigned fn(void)` by contract.
        let version = unsafe {
            let func: Symbol<VersionFn> = library
                .get(component.version_symbol.as_bytes())
                .map_err(|e| {
                    format!(
                        "missing version function '{}': {}",
                        component.version_symbol, e
                    )
                })?;
            func()
        };

        Ok(Self { library, version })
    }
}

impl SharedObject for NativeObject {
    fn lookup(&self, symbol: &str) -> bool {
        // SAFETY: the symbol is only checked for presence, never called.
        unsafe {
            self.library
                .get::<unsafe extern "C" fn()>(symbol.as_bytes())
                .is_ok()
        }
    }

    fn version(&self) -> AbiVersion {
        self.version
    }
}

/// Provider opening its components from shared objects on disk
pub struct SharedLibraryProvider {
    specs: Vec<ComponentSpec>,
    components: Vec<NativeComponent>,
    binder: Binder,
}

impl SharedLibraryProvider {
    pub fn new(components: Vec<NativeComponent>, binder: Binder) -> Self {
        Self {
            specs: components.iter().map(|c| c.spec).collect(),
            components,
            binder,
        }
    }
}

impl LibraryProvider for SharedLibraryProvider {
    fn components(&self) -> &[ComponentSpec] {
        &self.specs
    }

    fn open(&self, component: &ComponentSpec) -> Result<Box<dyn SharedObject>, String> {
        let native = self
            .components
            .iter()
            .find(|c| c.spec.name == component.name)
            .ok_or_else(|| format!("no path configured for {}", component.name))?;
        log::debug!("opening {} from {}", component.name, native.path.display());
        Ok(Box::new(NativeObject::open(native)?))
    }

    fn bind(&self, objects: &[Box<dyn SharedObject>]) -> Result<Arc<dyn CodecLibrary>, String> {
        (self.binder)(objects)
    }
}

static AVUTIL: ComponentSpec = ComponentSpec {
    name: "avutil",
    compiled: abi_version(58, 29, 100),
    symbols: &[
        "av_opt_set_int",
        "av_opt_set_sample_fmt",
        "av_malloc",
        "av_strerror",
        "av_frame_alloc",
        "av_rescale",
        "av_frame_free",
        "av_frame_unref",
        "av_dict_get",
        "av_get_bytes_per_sample",
    ],
};

static AVCODEC: ComponentSpec = ComponentSpec {
    name: "avcodec",
    compiled: abi_version(60, 31, 102),
    symbols: &[
        "avcodec_find_decoder",
        "avcodec_alloc_context3",
        "avcodec_parameters_to_context",
        "avcodec_open2",
        "av_packet_alloc",
        "avcodec_send_packet",
        "avcodec_receive_frame",
        "av_packet_unref",
        "av_packet_free",
        "avcodec_flush_buffers",
        "avcodec_free_context",
    ],
};

static AVFORMAT: ComponentSpec = ComponentSpec {
    name: "avformat",
    compiled: abi_version(60, 16, 100),
    symbols: &[
        "avformat_alloc_context",
        "avio_alloc_context",
        "avformat_open_input",
        "avformat_find_stream_info",
        "av_find_best_stream",
        "av_seek_frame",
        "av_read_frame",
        "avformat_seek_file",
        "avformat_close_input",
    ],
};

static SWRESAMPLE: ComponentSpec = ComponentSpec {
    name: "swresample",
    compiled: abi_version(4, 12, 100),
    symbols: &["swr_alloc", "swr_init", "swr_convert", "swr_free"],
};

/// Platform file name of a shared object with an ABI major suffix
pub fn versioned_filename(name: &str, major: u32) -> String {
    if cfg!(target_os = "windows") {
        format!("{}-{}.dll", name, major)
    } else if cfg!(target_os = "macos") {
        format!("lib{}.{}.dylib", name, major)
    } else {
        format!("lib{}.so.{}", name, major)
    }
}

/// The FFmpeg libraries, looked up in `dir`
pub fn ffmpeg_components(dir: &Path) -> Vec<NativeComponent> {
    [&AVUTIL, &AVCODEC, &AVFORMAT, &SWRESAMPLE]
        .into_iter()
        .map(|spec| NativeComponent {
            spec: *spec,
            path: dir.join(versioned_filename(spec.name, abi_major(spec.compiled))),
            version_symbol: match spec.name {
                "avutil" => "avutil_version",
                "avcodec" => "avcodec_version",
                "avformat" => "avformat_version",
                _ => "swresample_version",
            },
        })
        .collect()
}

/// A loader that requires the FFmpeg libraries in `dir`.
///
/// The libraries are checked and kept resident for as long as the loader
/// is loaded; demuxing and decoding go through the symphonia binding.
pub fn ffmpeg_loader(dir: &Path) -> Arc<BackendLoader> {
    let binder: Binder = Box::new(|objects| {
        log::debug!("binding symphonia over {} native component(s)", objects.len());
        Ok(Arc::new(SymphoniaLibrary::new()) as Arc<dyn CodecLibrary>)
    });
    Arc::new(BackendLoader::new(
        "Container",
        Box::new(SharedLibraryProvider::new(ffmpeg_components(dir), binder)),
    ))
}
