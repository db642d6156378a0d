///
/// Function call arguments.
///
/// The host calls an extension function with an array of nullable argument
/// datums. Argument positions are zero-based; a NULL or missing argument
/// reads as `None`.
///

use std::rc::Rc;

use crate::datum::Datum;
use crate::host::InternalState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullableDatum {
    pub value: Datum,
    pub isnull: bool,
}

impl NullableDatum {
    pub fn null() -> Self {
        Self {
            value: Datum::NULL,
            isnull: true,
        }
    }
}

impl From<Option<Datum>> for NullableDatum {
    fn from(value: Option<Datum>) -> Self {
        match value {
            Some(value) => Self { value, isnull: false },
            None => Self::null(),
        }
    }
}

impl From<Datum> for NullableDatum {
    fn from(value: Datum) -> Self {
        Self { value, isnull: false }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionCallInfo {
    args: Vec<NullableDatum>,
}

impl FunctionCallInfo {
    pub fn new(args: Vec<NullableDatum>) -> Self {
        Self { args }
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    pub fn args(&self) -> &[NullableDatum] {
        &self.args
    }

    pub fn get_arg(&self, index: usize) -> Option<Datum> {
        let arg = self.args.get(index)?;
        if arg.isnull { None } else { Some(arg.value) }
    }

    /// The aggregate transition state passed as the first argument.
    ///
    /// `None` when the argument is NULL, does not reference an internal
    /// value, or the value is not a `T`.
    pub fn aggregation_state<T: 'static, H: InternalState + ?Sized>(&self, host: &H) -> Option<Rc<T>> {
        let datum = self.get_arg(0)?;
        let state = host.internal_state(datum)?;
        match state.downcast::<T>() {
            Ok(state) => Some(state),
            Err(_) => {
                tracing::debug!("internal argument has a different state type");
                None
            }
        }
    }
}
