//! Purpose: Plugin lifecycle contract and adapters for Rust and C-ABI plugins.
//! Exports: `Plugin`, `PluginInstance`, `ForeignPlugin`, `Phase`, `EntryPoint`, `PluginInit`.
//! Role: Host side of setup/execute/cleanup; an orchestrator drives `PluginInstance`.
//! Invariants: Block handles passed to a foreign phase are valid for that call only.
//! Invariants: A negative foreign status is an error carrying the pending ABI error as source.
//! Invariants: The pending ABI error is cleared after every foreign phase.
#![allow(clippy::result_large_err)]

use crate::abi::{self, RawBlock, dblk_block};
use crate::api::block::DataBlock;
use crate::capsule::{BLOCK_API, dblk_api};
use crate::core::error::{Error, ErrorKind};
use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

pub type EntryPoint =
    unsafe extern "C" fn(*const c_char, *mut dblk_block, *mut dblk_block) -> c_int;
pub type PluginInit = unsafe extern "C" fn(*const dblk_api) -> c_int;

pub const INIT_SYMBOL: &str = "dblk_plugin_init";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Setup,
    Execute,
    Cleanup,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Execute => "execute",
            Phase::Cleanup => "cleanup",
        }
    }
}

pub trait Plugin {
    fn setup(&mut self, name: &str, config: &DataBlock, data: &DataBlock) -> Result<(), Error>;

    fn execute(&mut self, name: &str, config: &DataBlock, data: &DataBlock) -> Result<(), Error>;

    fn cleanup(&mut self, _name: &str, _config: &DataBlock, _data: &DataBlock) -> Result<(), Error> {
        Ok(())
    }
}

/// A plugin bound to its instance name and its (config, data) blocks.
pub struct PluginInstance<P> {
    name: String,
    plugin: P,
    config: DataBlock,
    data: DataBlock,
    executions: u64,
}

impl<P: Plugin> PluginInstance<P> {
    pub fn new(name: impl Into<String>, plugin: P, config: DataBlock, data: DataBlock) -> Self {
        Self {
            name: name.into(),
            plugin,
            config,
            data,
            executions: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn config(&self) -> &DataBlock {
        &self.config
    }

    pub fn data(&self) -> &DataBlock {
        &self.data
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn setup(&mut self) -> Result<(), Error> {
        self.run(Phase::Setup)
    }

    pub fn execute(&mut self) -> Result<(), Error> {
        self.run(Phase::Execute)
    }

    pub fn cleanup(&mut self) -> Result<(), Error> {
        self.run(Phase::Cleanup)
    }

    fn run(&mut self, phase: Phase) -> Result<(), Error> {
        tracing::debug!(plugin = %self.name, phase = phase.name(), "plugin phase start");
        let result = match phase {
            Phase::Setup => self.plugin.setup(&self.name, &self.config, &self.data),
            Phase::Execute => self.plugin.execute(&self.name, &self.config, &self.data),
            Phase::Cleanup => self.plugin.cleanup(&self.name, &self.config, &self.data),
        };
        match &result {
            Ok(()) => {
                if phase == Phase::Execute {
                    self.executions += 1;
                }
                tracing::debug!(plugin = %self.name, phase = phase.name(), "plugin phase done");
            }
            Err(err) => {
                tracing::error!(
                    plugin = %self.name,
                    phase = phase.name(),
                    error = %err,
                    "plugin phase failed"
                );
            }
        }
        result
    }
}

struct Library {
    handle: *mut c_void,
    path: PathBuf,
}

impl Library {
    fn open(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("plugin library {} does not exist", path.display())));
        }
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("plugin path contains a NUL byte")
                .with_source(err)
        })?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(Error::new(ErrorKind::AbiResolution).with_message(format!(
                "failed to load {}: {}",
                path.display(),
                last_dl_error()
            )));
        }
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    fn symbol(&self, name: &str) -> Option<*mut c_void> {
        let c_name = CString::new(name).ok()?;
        let ptr = unsafe {
            libc::dlerror();
            libc::dlsym(self.handle, c_name.as_ptr())
        };
        if ptr.is_null() { None } else { Some(ptr) }
    }

    fn entry_point(&self, name: &str) -> Result<EntryPoint, Error> {
        let ptr = self.symbol(name).ok_or_else(|| {
            Error::new(ErrorKind::AbiResolution)
                .with_message(format!(
                    "{} does not export `{name}`",
                    self.path.display()
                ))
                .with_hint("Plugins must export setup, execute, and cleanup with C linkage.")
        })?;
        Ok(unsafe { std::mem::transmute::<*mut c_void, EntryPoint>(ptr) })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

fn last_dl_error() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return "unknown dynamic loader error".to_string();
    }
    unsafe { CStr::from_ptr(message) }
        .to_string_lossy()
        .into_owned()
}

/// A plugin reached through C entry points.
pub struct ForeignPlugin {
    label: String,
    setup: EntryPoint,
    execute: EntryPoint,
    cleanup: EntryPoint,
    // Declared last so the library outlives the entry points above.
    _library: Option<Library>,
}

impl ForeignPlugin {
    pub fn from_entry_points(
        label: impl Into<String>,
        setup: EntryPoint,
        execute: EntryPoint,
        cleanup: EntryPoint,
    ) -> Self {
        Self {
            label: label.into(),
            setup,
            execute,
            cleanup,
            _library: None,
        }
    }

    /// Load a shared library, resolve its entry points, and inject the export table
    /// when it exports `dblk_plugin_init`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let library = Library::open(path)?;
        let setup = library.entry_point("setup")?;
        let execute = library.entry_point("execute")?;
        let cleanup = library.entry_point("cleanup")?;

        if let Some(ptr) = library.symbol(INIT_SYMBOL) {
            let init = unsafe { std::mem::transmute::<*mut c_void, PluginInit>(ptr) };
            let status = unsafe { init(&BLOCK_API) };
            let pending = abi::take_pending_error();
            if status < 0 {
                let err = Error::new(ErrorKind::AbiResolution).with_message(format!(
                    "{INIT_SYMBOL} in {} returned status {status}",
                    path.display()
                ));
                return Err(match pending {
                    Some(pending) => err.with_source(pending),
                    None => err,
                });
            }
            tracing::debug!(library = %path.display(), "injected export table");
        }

        tracing::info!(library = %path.display(), "loaded plugin library");
        Ok(Self {
            label: path.display().to_string(),
            setup,
            execute,
            cleanup,
            _library: Some(library),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn call(
        &self,
        phase: Phase,
        name: &str,
        config: &DataBlock,
        data: &DataBlock,
    ) -> Result<(), Error> {
        let entry = match phase {
            Phase::Setup => self.setup,
            Phase::Execute => self.execute,
            Phase::Cleanup => self.cleanup,
        };
        let c_name = CString::new(name).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("plugin instance name contains a NUL byte")
                .with_source(err)
        })?;
        let config_handle = RawBlock::new(config);
        let data_handle = RawBlock::new(data);
        let status = unsafe { entry(c_name.as_ptr(), config_handle.as_ptr(), data_handle.as_ptr()) };
        let pending = abi::take_pending_error();

        if status < 0 {
            let err = Error::new(ErrorKind::Internal).with_message(format!(
                "{} {} returned status {status}",
                self.label,
                phase.name()
            ));
            return Err(match pending {
                Some(pending) => err.with_source(pending),
                None => err,
            });
        }
        if let Some(pending) = pending {
            tracing::warn!(
                plugin = %self.label,
                phase = phase.name(),
                error = %pending,
                "plugin reported success with a pending error"
            );
        }
        Ok(())
    }
}

impl Plugin for ForeignPlugin {
    fn setup(&mut self, name: &str, config: &DataBlock, data: &DataBlock) -> Result<(), Error> {
        self.call(Phase::Setup, name, config, data)
    }

    fn execute(&mut self, name: &str, config: &DataBlock, data: &DataBlock) -> Result<(), Error> {
        self.call(Phase::Execute, name, config, data)
    }

    fn cleanup(&mut self, name: &str, config: &DataBlock, data: &DataBlock) -> Result<(), Error> {
        self.call(Phase::Cleanup, name, config, data)
    }
}
