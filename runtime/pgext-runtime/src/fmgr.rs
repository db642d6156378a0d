///
/// Function invocation.
///
/// `Backend::call` plays the host's function manager: it packs the
/// arguments into a `FunctionCallInfo`, runs the extension function, and
/// reports an abort (any panic raised inside the call) as
/// `CallError::Aborted` carrying the abort message. SPI connections left
/// open by the function, including cursors dropped before exhaustion, are
/// logged and closed once the call returns. The memory context is left
/// alone so the caller can still decode the result.
///

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use pgext_core::{Datum, FunctionCallInfo, NullableDatum, SpiBackend};

use crate::error::CallError;
use crate::Backend;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s.to_string();
    }
    "function call aborted without a message".to_string()
}

impl Backend {
    /// Calls `f` with `args` as its arguments (`None` for SQL NULL).
    pub fn call<R>(
        &self,
        args: &[Option<Datum>],
        f: impl FnOnce(&FunctionCallInfo, &Backend) -> R,
    ) -> Result<R, CallError> {
        let fcinfo = FunctionCallInfo::new(args.iter().map(|a| NullableDatum::from(*a)).collect());
        let depth = self.spi.depth();
        tracing::debug!(nargs = fcinfo.nargs(), "calling function");

        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&fcinfo, self)));

        let leaked = self.spi.depth().saturating_sub(depth);
        if leaked > 0 {
            tracing::warn!(leaked, "function returned with SPI connections still open, closing them");
            self.stats.leaked_connections.set(self.stats.leaked_connections.get() + leaked as u64);
            for _ in 0..leaked {
                self.spi_finish();
            }
        }

        result.map_err(|payload| {
            let message = panic_message(payload);
            tracing::debug!(%message, "function call aborted");
            CallError::Aborted { message }
        })
    }

    /// Stores an `internal` value, such as an aggregate state, and returns
    /// the datum that refers to it.
    pub fn make_internal<T: 'static>(&self, value: T) -> Datum {
        self.memory.alloc_internal(Rc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;

    #[test]
    fn test_call_returns_value() {
        let host = Backend::new(HostConfig::default()).unwrap();
        let out = host
            .call(&[Some(Datum::from_i32(20)), Some(Datum::from_i32(22))], |fcinfo, _| {
                let a = fcinfo.get_arg(0).map(|d| d.as_i32()).unwrap_or(0);
                let b = fcinfo.get_arg(1).map(|d| d.as_i32()).unwrap_or(0);
                Datum::from_i32(a + b)
            })
            .unwrap();
        assert_eq!(out.as_i32(), 42);
    }

    #[test]
    fn test_abort_becomes_call_error() {
        let host = Backend::new(HostConfig::default()).unwrap();
        let err = host
            .call(&[], |_, _| -> Datum {
                pgext_core::abort(pgext_core::BridgeError::MissingResultDescriptor)
            })
            .unwrap_err();
        assert_eq!(err.message(), "query returned no tuple descriptor");
    }

    #[test]
    fn test_leaked_connection_is_closed() {
        let host = Backend::new(HostConfig::default()).unwrap();
        host.call(&[], |_, host| {
            host.spi_connect();
        })
        .unwrap();
        assert_eq!(host.spi.depth(), 0);
        assert_eq!(host.stats().leaked_connections, 1);
    }

    #[test]
    fn test_internal_state_roundtrip() {
        let host = Backend::new(HostConfig::default()).unwrap();
        let state = host.make_internal(vec![1.5f64, 2.5]);
        let sum = host
            .call(&[Some(state)], |fcinfo, host| {
                fcinfo
                    .aggregation_state::<Vec<f64>, _>(host)
                    .map(|v| v.iter().sum::<f64>())
            })
            .unwrap();
        assert_eq!(sum, Some(4.0));
    }
}
