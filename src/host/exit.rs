//! Interceptable process termination.
//!
//! Plugins never call `std::process::exit` directly; they go through
//! [`ExitHooks::request`]. While an interceptor is installed the request
//! comes back as a [`ScriptError::Exit`] value instead of ending the host,
//! and is also recorded on the interceptor so that whoever installed it
//! sees the request even if the plugin drops the returned error.

use tracing::{debug, warn};

use crate::error::ScriptError;

/// Code used when an exit request does not name one.
pub const DEFAULT_EXIT_CODE: i32 = 0;

/// The real termination primitive.
pub type ExitPrimitive = fn(i32) -> !;

/// Proof of an installed exit interceptor.
#[derive(Debug)]
#[must_use = "exit requests stay intercepted until the token is restored"]
pub struct ExitToken {
    id: u64,
}

struct Interceptor {
    id: u64,
    /// First exit requested while this interceptor was on top.
    pending: Option<ScriptError>,
}

pub struct ExitHooks {
    primitive: ExitPrimitive,
    interceptors: Vec<Interceptor>,
    next_id: u64,
}

impl Default for ExitHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitHooks {
    pub fn new() -> Self {
        Self::with_primitive(std::process::exit)
    }

    pub fn with_primitive(primitive: ExitPrimitive) -> Self {
        Self {
            primitive,
            interceptors: Vec::new(),
            next_id: 0,
        }
    }

    pub fn intercept(&mut self) -> ExitToken {
        self.next_id += 1;
        self.interceptors.push(Interceptor {
            id: self.next_id,
            pending: None,
        });
        ExitToken { id: self.next_id }
    }

    /// Removes the interceptor installed by `token` (and any installed
    /// after it), returning the exit request it caught, if any.
    pub fn restore(&mut self, token: ExitToken) -> Option<ScriptError> {
        match self.interceptors.iter().position(|i| i.id == token.id) {
            Some(pos) => {
                let caught = self.interceptors[pos].pending.take();
                self.interceptors.truncate(pos);
                caught
            }
            None => {
                warn!("Ignoring stale exit interceptor token {}", token.id);
                None
            }
        }
    }

    pub fn is_intercepted(&self) -> bool {
        !self.interceptors.is_empty()
    }

    /// Requests termination with `code` (default 0).
    ///
    /// Returns the error the caller must propagate when intercepted;
    /// otherwise hands over to the primitive and does not return. Only the
    /// first request seen by an interceptor is kept.
    #[must_use = "an intercepted exit must be returned as the plugin's error"]
    pub fn request(&mut self, code: Option<i32>, captured: &str) -> ScriptError {
        let code = code.unwrap_or(DEFAULT_EXIT_CODE);
        let Some(top) = self.interceptors.last_mut() else {
            debug!("Exit requested with code {code}, terminating");
            (self.primitive)(code)
        };
        debug!("Intercepted exit request with code {code}");
        let err = ScriptError::Exit {
            code,
            message: captured.trim().to_string(),
        };
        top.pending.get_or_insert_with(|| err.clone());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panicking_exit(code: i32) -> ! {
        panic!("real exit reached with code {code}")
    }

    #[test]
    fn test_intercepted_request_returns_exit_error() {
        let mut hooks = ExitHooks::with_primitive(panicking_exit);
        let token = hooks.intercept();
        let err = hooks.request(Some(4), "  last words \n");
        assert_eq!(
            &err,
            &ScriptError::Exit {
                code: 4,
                message: "last words".to_string()
            }
        );
        assert_eq!(hooks.restore(token), Some(err));
    }

    #[test]
    fn test_default_code_is_zero() {
        let mut hooks = ExitHooks::with_primitive(panicking_exit);
        let _token = hooks.intercept();
        assert_eq!(hooks.request(None, "").exit_code(), Some(0));
    }

    #[test]
    fn test_dropped_request_is_still_recorded() {
        let mut hooks = ExitHooks::with_primitive(panicking_exit);
        let token = hooks.intercept();
        let _ = hooks.request(Some(3), "first");
        let _ = hooks.request(Some(5), "second");
        let caught = hooks.restore(token).unwrap();
        assert_eq!(caught.exit_code(), Some(3));
        assert_eq!(caught.message(), "first");
    }

    #[test]
    fn test_request_lands_on_innermost_interceptor() {
        let mut hooks = ExitHooks::with_primitive(panicking_exit);
        let outer = hooks.intercept();
        let inner = hooks.intercept();
        let _ = hooks.request(Some(2), "");
        assert_eq!(hooks.restore(inner).and_then(|e| e.exit_code()), Some(2));
        assert_eq!(hooks.restore(outer), None);
    }

    #[test]
    #[should_panic(expected = "real exit reached with code 9")]
    fn test_restore_reinstates_primitive() {
        let mut hooks = ExitHooks::with_primitive(panicking_exit);
        let token = hooks.intercept();
        hooks.restore(token);
        assert!(!hooks.is_intercepted());
        let _ = hooks.request(Some(9), "");
    }

    #[test]
    fn test_nested_interceptors_unwind_in_order() {
        let mut hooks = ExitHooks::with_primitive(panicking_exit);
        let outer = hooks.intercept();
        let inner = hooks.intercept();
        hooks.restore(inner);
        assert!(hooks.is_intercepted());
        hooks.restore(outer);
        assert!(!hooks.is_intercepted());
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let mut hooks = ExitHooks::with_primitive(panicking_exit);
        let first = hooks.intercept();
        let stale = ExitToken { id: first.id };
        hooks.restore(first);
        let live = hooks.intercept();
        hooks.restore(stale);
        assert!(hooks.is_intercepted());
        hooks.restore(live);
    }
}
