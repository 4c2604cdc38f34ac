//! Shared-library loading and symbol resolution.
//!
//! The invocation engine only consumes resolved addresses; this module is
//! the collaborator that produces them. Libraries are cached by path and
//! symbols by `(path, name)` for the lifetime of the process, so repeated
//! resolutions are lookups. `close` drops a library and purges every symbol
//! resolved through it, so cached addresses never outlive their library.

use std::collections::HashMap;
use std::sync::OnceLock;

use libloading::Library;
use log::debug;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::invoke::FnAddr;

/// Path token that resolves symbols against the running process itself.
pub const SELF_PATH: &str = "RTLD_SELF";

fn libraries() -> &'static Mutex<HashMap<String, Library>> {
    static LIBRARIES: OnceLock<Mutex<HashMap<String, Library>>> = OnceLock::new();
    LIBRARIES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn symbols() -> &'static Mutex<HashMap<(String, String), FnAddr>> {
    static SYMBOLS: OnceLock<Mutex<HashMap<(String, String), FnAddr>>> = OnceLock::new();
    SYMBOLS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Open a shared library, or reuse the cached handle for this path.
pub fn open(path: &str) -> Result<()> {
    let mut libs = libraries().lock();
    if libs.contains_key(path) {
        return Ok(());
    }
    let library = if path == SELF_PATH {
        self_library()?
    } else {
        unsafe { Library::new(path) }
            .map_err(|e| Error::Lookup(format!("failed to load library '{path}': {e}")))?
    };
    debug!("opened library '{path}'");
    libs.insert(path.to_string(), library);
    Ok(())
}

#[cfg(unix)]
fn self_library() -> Result<Library> {
    Ok(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn self_library() -> Result<Library> {
    libloading::os::windows::Library::this()
        .map(Into::into)
        .map_err(|e| Error::Lookup(format!("failed to open the running process: {e}")))
}

/// Resolve a symbol to a stable function address, opening the library if
/// needed. Addresses are cached by `(path, symbol)`.
pub fn resolve(path: &str, symbol: &str) -> Result<FnAddr> {
    let key = (path.to_string(), symbol.to_string());
    if let Some(addr) = symbols().lock().get(&key) {
        return Ok(*addr);
    }

    open(path)?;
    let libs = libraries().lock();
    let library = libs
        .get(path)
        .ok_or_else(|| Error::Lookup(format!("library '{path}' is not open")))?;
    let func: libloading::Symbol<'_, unsafe extern "C" fn()> =
        unsafe { library.get(symbol.as_bytes()) }.map_err(|e| {
            Error::Lookup(format!("symbol '{symbol}' not found in '{path}': {e}"))
        })?;
    let addr = FnAddr::new(*func as usize);

    symbols().lock().insert(key, addr);
    debug!("resolved '{symbol}' in '{path}' to {:#x}", addr.raw());
    Ok(addr)
}

/// Close a library and drop every symbol resolved through it.
pub fn close(path: &str) -> Result<()> {
    symbols().lock().retain(|(p, _), _| p != path);
    match libraries().lock().remove(path) {
        Some(_) => Ok(()),
        None => Err(Error::Lookup(format!("library '{path}' is not open"))),
    }
}
