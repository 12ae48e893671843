//! Type erasure, so promises of different output types can be raced or joined.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::{Error, Promise};

/// A value tagged with the type it was erased from.
#[derive(Clone)]
pub struct Erased {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// A promise whose output type has been erased.
pub type OpaquePromise<E = Error> = Promise<Erased, E>;

impl Erased {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Recovers the value, or fails with [`Error::TypeMismatch`].
    pub fn downcast<T: Any + Clone>(&self) -> Result<T, Error> {
        let mismatch = || Error::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: self.type_name,
        };
        if !self.is::<T>() {
            return Err(mismatch());
        }
        self.value.downcast_ref::<T>().cloned().ok_or_else(mismatch)
    }
}

impl fmt::Debug for Erased {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Erased").field("type", &self.type_name).finish_non_exhaustive()
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + 'static,
{
    pub fn erase(&self) -> OpaquePromise<E> {
        self.then(|value| Ok(Erased::new(value)))
    }
}

impl<E> OpaquePromise<E>
where
    E: Clone + Send + From<Error> + 'static,
{
    /// Adopts the erased outcome as a `T`; a value of any other type becomes a
    /// [`Error::TypeMismatch`] failure.
    pub fn recover<T>(&self) -> Promise<T, E>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.then(|erased| erased.downcast::<T>().map_err(E::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, RunLoop};

    #[test]
    fn test_downcast() {
        let erased = Erased::new(5u8);
        assert!(erased.is::<u8>());
        assert_eq!(erased.downcast::<u8>().unwrap(), 5);
        match erased.downcast::<String>() {
            Err(Error::TypeMismatch { expected, found }) => {
                assert_eq!(expected, "alloc::string::String");
                assert_eq!(found, "u8");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_erase_and_recover_through_race() {
        let run_loop = RunLoop::new();
        let context = Context::new(run_loop.clone());
        let text = context.success::<String, Error>("ok".into()).erase();
        let (number, _keep) = context.pending::<u32, Error>();
        let raced = Promise::any([text, number.erase()]);
        let recovered = raced.recover::<String>();
        let mismatched = raced.recover::<u32>();
        run_loop.run_until_idle();
        assert_eq!(recovered.peek().unwrap().unwrap(), "ok");
        assert!(matches!(mismatched.peek(), Some(Err(Error::TypeMismatch { .. }))));
    }
}
