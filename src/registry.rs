//! Process-wide driver registry.
//!
//! A driver module is a shared library named `<prefix>_<driver>` (platform
//! decoration added by [`libloading::library_filename`]) exporting:
//!
//! ```text
//! <driver>_create_connection(const char* connection_string) -> void*
//! <driver>_destroy_connection(void* connection)
//! ```
//!
//! The pointer returned by `create` is a `Box<Box<dyn DriverConnection>>`
//! turned into a raw pointer; it is only ever released through `destroy`.
//! Modules are loaded once and cached for the life of the process.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CString};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use libloading::Library;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ConnectionString;
use crate::driver::DriverConnection;
use crate::error::{DbError, DbResult};

pub const DEFAULT_DRIVER_PREFIX: &str = "polysql";

/// `<driver>_create_connection`
pub type CreateConnectionFn = unsafe extern "C" fn(*const c_char) -> *mut c_void;
/// `<driver>_destroy_connection`
pub type DestroyConnectionFn = unsafe extern "C" fn(*mut c_void);

/// A loaded (or built-in) driver: its two entry points plus the library
/// that keeps them valid.
pub struct DriverModule {
    name: String,
    path: Option<PathBuf>,
    create: CreateConnectionFn,
    destroy: DestroyConnectionFn,
    // Dropped last; the function pointers above point into it.
    _library: Option<Library>,
}

impl DriverModule {
    fn load(driver: &str, path: &Path) -> DbResult<Self> {
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            DbError::DriverNotFound(format!("{driver} ({}): {e}", path.display()))
        })?;

        let create_symbol = format!("{driver}_create_connection");
        let destroy_symbol = format!("{driver}_destroy_connection");

        let create: CreateConnectionFn =
            *unsafe { lib.get::<CreateConnectionFn>(create_symbol.as_bytes()) }.map_err(|_| {
                DbError::SymbolNotFound {
                    module: path.display().to_string(),
                    symbol: create_symbol.clone(),
                }
            })?;
        let destroy: DestroyConnectionFn =
            *unsafe { lib.get::<DestroyConnectionFn>(destroy_symbol.as_bytes()) }.map_err(|_| {
                DbError::SymbolNotFound {
                    module: path.display().to_string(),
                    symbol: destroy_symbol.clone(),
                }
            })?;

        Ok(Self {
            name: driver.to_string(),
            path: Some(path.to_path_buf()),
            create,
            destroy,
            _library: Some(lib),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File the module was loaded from; `None` for built-in drivers.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn create_connection(self: &Arc<Self>, connection_string: &ConnectionString) -> DbResult<DriverHandle> {
        let text = CString::new(connection_string.to_url())
            .map_err(|_| DbError::Config("connection string contains a NUL byte".to_string()))?;
        let raw = unsafe { (self.create)(text.as_ptr()) };
        let raw = NonNull::new(raw as *mut Box<dyn DriverConnection>).ok_or_else(|| {
            DbError::Connection(format!(
                "{} driver rejected connection string {connection_string}",
                self.name
            ))
        })?;
        Ok(DriverHandle::Module {
            raw,
            module: Arc::clone(self),
        })
    }
}

impl std::fmt::Debug for DriverModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverModule")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

/// Owner of one driver connection, however it was created.
pub enum DriverHandle {
    Owned(Box<dyn DriverConnection>),
    Module {
        raw: NonNull<Box<dyn DriverConnection>>,
        module: Arc<DriverModule>,
    },
}

// The module pointer is uniquely owned by this handle and the pointee is
// `DriverConnection: Send`.
unsafe impl Send for DriverHandle {}

impl DriverHandle {
    pub fn owned(driver: Box<dyn DriverConnection>) -> Self {
        DriverHandle::Owned(driver)
    }
}

impl Deref for DriverHandle {
    type Target = dyn DriverConnection;

    fn deref(&self) -> &Self::Target {
        match self {
            DriverHandle::Owned(driver) => &**driver,
            DriverHandle::Module { raw, .. } => unsafe { &**raw.as_ref() },
        }
    }
}

impl DerefMut for DriverHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            DriverHandle::Owned(driver) => &mut **driver,
            DriverHandle::Module { raw, .. } => unsafe { &mut **raw.as_mut() },
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        if let DriverHandle::Module { raw, module } = self {
            debug!(target: "polysql::registry", driver = %module.name, "destroying connection");
            unsafe { (module.destroy)(raw.as_ptr() as *mut c_void) };
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Maps driver names to loaded modules.
pub struct DriverRegistry {
    modules: Mutex<HashMap<String, Arc<DriverModule>>>,
    search_dirs: Mutex<Vec<PathBuf>>,
}

static GLOBAL: Lazy<DriverRegistry> = Lazy::new(|| {
    let registry = DriverRegistry::new();
    registry.register(
        "sqlite3",
        crate::sqlite::sqlite3_create_connection,
        crate::sqlite::sqlite3_destroy_connection,
    );
    registry
});

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// An empty registry. Most code wants [`DriverRegistry::global`].
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(HashMap::new()),
            search_dirs: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide registry, with the built-in SQLite3 driver.
    pub fn global() -> &'static DriverRegistry {
        &GLOBAL
    }

    /// Register in-process entry points under `name`, replacing any
    /// previous registration.
    pub fn register(&self, name: &str, create: CreateConnectionFn, destroy: DestroyConnectionFn) {
        let module = DriverModule {
            name: name.to_string(),
            path: None,
            create,
            destroy,
            _library: None,
        };
        self.modules.lock().insert(name.to_string(), Arc::new(module));
    }

    /// Also look for driver modules in `dir` before the system search path.
    pub fn add_search_dir(&self, dir: impl Into<PathBuf>) {
        self.search_dirs.lock().push(dir.into());
    }

    pub fn is_loaded(&self, driver: &str) -> bool {
        self.modules.lock().contains_key(driver)
    }

    pub fn loaded_drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Return the cached module for `driver`, loading `<prefix>_<driver>`
    /// on first use.
    pub fn load(&self, driver: &str, prefix: &str) -> DbResult<Arc<DriverModule>> {
        let mut modules = self.modules.lock();
        if let Some(module) = modules.get(driver) {
            return Ok(Arc::clone(module));
        }

        let file_name = libloading::library_filename(format!("{prefix}_{driver}"));
        let candidates: Vec<PathBuf> = self
            .search_dirs
            .lock()
            .iter()
            .map(|dir| dir.join(&file_name))
            .filter(|path| path.exists())
            .chain(std::iter::once(PathBuf::from(&file_name)))
            .collect();

        let mut last_error = None;
        for path in candidates {
            debug!(target: "polysql::registry", driver, path = %path.display(), "loading driver module");
            match DriverModule::load(driver, &path) {
                Ok(module) => {
                    info!(target: "polysql::registry", driver, path = %path.display(), "driver module loaded");
                    let module = Arc::new(module);
                    modules.insert(driver.to_string(), Arc::clone(&module));
                    return Ok(module);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| DbError::DriverNotFound(driver.to_string())))
    }

    /// Create an unopened driver connection for `connection_string`.
    pub fn create_connection(
        &self,
        connection_string: &ConnectionString,
        prefix: &str,
    ) -> DbResult<DriverHandle> {
        let module = self.load(&connection_string.driver, prefix)?;
        module.create_connection(connection_string)
    }
}
