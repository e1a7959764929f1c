//! Handler parameter declarations.
//!
//! Every handler argument type implements [`FromParam`], which declares a
//! [`ParamSlot`] once at registration time and later rebuilds the typed value
//! from whatever the resolution plan produced for that slot.

use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use switchyard_core::{Identifier, Pagination, Principal};
use tokio_util::sync::CancellationToken;

use super::context::CallContext;
use super::resolver::{OperationLogger, ResolveError};

/// Value produced by a request-scoped resolver.
pub type ParamValue = Box<dyn Any + Send>;

/// Value produced once by a factory resolver and shared by every call.
pub type SharedValue = Arc<dyn Any + Send + Sync>;

/// Decodes a params/meta object into a boxed `T`.
pub type Decoder = fn(&Map<String, Value>) -> Result<ParamValue, ResolveError>;

/// Type tag used to match a parameter with a resolver.
#[derive(Clone, Copy)]
pub struct ParamType {
    id: TypeId,
    name: &'static str,
}

impl ParamType {
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ParamType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ParamType {}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// How one handler argument is obtained.
#[derive(Clone, Copy)]
pub enum ParamSlot {
    /// Decode the request's `params` object.
    Params { ty: ParamType, decode: Decoder },
    /// Decode the request's `meta` object.
    Meta { ty: ParamType, decode: Decoder },
    /// Ask the resolver set for a value of this type.
    Typed(ParamType),
}

impl ParamSlot {
    #[must_use]
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Params { ty, .. } | Self::Meta { ty, .. } | Self::Typed(ty) => *ty,
        }
    }
}

impl fmt::Debug for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Params { ty, .. } => write!(f, "Params<{ty:?}>"),
            Self::Meta { ty, .. } => write!(f, "Meta<{ty:?}>"),
            Self::Typed(ty) => write!(f, "{ty:?}"),
        }
    }
}

/// A resolved argument, before it is turned back into its concrete type.
pub enum ResolvedValue {
    Owned(ParamValue),
    Shared(SharedValue),
}

impl ResolvedValue {
    /// Recovers a `T`, moving out of owned values and cloning shared ones.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::TypeMismatch` if the resolver produced a value
    /// of a different type than it advertised.
    pub fn downcast<T: Clone + Send + 'static>(self) -> Result<T, ResolveError> {
        let mismatch = || ResolveError::TypeMismatch {
            type_name: std::any::type_name::<T>(),
        };
        match self {
            Self::Owned(value) => value.downcast::<T>().map(|b| *b).map_err(|_| mismatch()),
            Self::Shared(value) => value.downcast_ref::<T>().cloned().ok_or_else(mismatch),
        }
    }
}

/// A type that can appear as a handler argument.
pub trait FromParam: Sized + Send + 'static {
    /// Declares how the argument is obtained.
    fn slot() -> ParamSlot;

    /// Rebuilds the argument from its resolved value.
    ///
    /// # Errors
    ///
    /// Returns an error when the value does not have the declared type.
    fn from_value(value: ResolvedValue) -> Result<Self, ResolveError>;
}

fn decode<T: DeserializeOwned + Send + 'static>(
    source_name: &'static str,
    object: &Map<String, Value>,
) -> Result<ParamValue, ResolveError> {
    serde_json::from_value::<T>(Value::Object(object.clone()))
        .map(|value| Box::new(value) as ParamValue)
        .map_err(|err| ResolveError::Decode {
            source_name,
            type_name: std::any::type_name::<T>(),
            message: err.to_string(),
        })
}

fn decode_params<T: DeserializeOwned + Send + 'static>(
    object: &Map<String, Value>,
) -> Result<ParamValue, ResolveError> {
    decode::<T>("params", object)
}

fn decode_meta<T: DeserializeOwned + Send + 'static>(
    object: &Map<String, Value>,
) -> Result<ParamValue, ResolveError> {
    decode::<T>("meta", object)
}

fn take_owned<T: Send + 'static>(value: ResolvedValue) -> Result<T, ResolveError> {
    match value {
        ResolvedValue::Owned(value) => value.downcast::<T>().map(|b| *b).map_err(|_| {
            ResolveError::TypeMismatch {
                type_name: std::any::type_name::<T>(),
            }
        }),
        ResolvedValue::Shared(_) => Err(ResolveError::TypeMismatch {
            type_name: std::any::type_name::<T>(),
        }),
    }
}

/// The request's `params` object decoded into `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct Params<T>(pub T);

impl<T> Deref for Params<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: DeserializeOwned + Send + 'static> FromParam for Params<T> {
    fn slot() -> ParamSlot {
        ParamSlot::Params {
            ty: ParamType::of::<T>(),
            decode: decode_params::<T>,
        }
    }

    fn from_value(value: ResolvedValue) -> Result<Self, ResolveError> {
        take_owned::<T>(value).map(Params)
    }
}

/// The request's `meta` object decoded into `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct Meta<T>(pub T);

impl<T> Deref for Meta<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: DeserializeOwned + Send + 'static> FromParam for Meta<T> {
    fn slot() -> ParamSlot {
        ParamSlot::Meta {
            ty: ParamType::of::<T>(),
            decode: decode_meta::<T>,
        }
    }

    fn from_value(value: ResolvedValue) -> Result<Self, ResolveError> {
        take_owned::<T>(value).map(Meta)
    }
}

/// A value of an application type supplied by a user-registered resolver.
#[derive(Debug, Clone)]
pub struct Inject<T>(pub T);

impl<T> Deref for Inject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Clone + Send + Sync + 'static> FromParam for Inject<T> {
    fn slot() -> ParamSlot {
        ParamSlot::Typed(ParamType::of::<T>())
    }

    fn from_value(value: ResolvedValue) -> Result<Self, ResolveError> {
        value.downcast::<T>().map(Inject)
    }
}

/// Framework types usable directly as handler arguments.
macro_rules! typed_param {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromParam for $ty {
                fn slot() -> ParamSlot {
                    ParamSlot::Typed(ParamType::of::<$ty>())
                }

                fn from_value(value: ResolvedValue) -> Result<Self, ResolveError> {
                    value.downcast::<$ty>()
                }
            }
        )*
    };
}

typed_param!(
    Principal,
    CallContext,
    Identifier,
    Pagination,
    CancellationToken,
    OperationLogger,
);

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct CreateUser {
        username: String,
        age: u32,
    }

    #[test]
    fn params_slot_decodes_objects() {
        let ParamSlot::Params { decode, ty } = Params::<CreateUser>::slot() else {
            panic!("expected params slot");
        };
        assert_eq!(ty, ParamType::of::<CreateUser>());

        let object = json!({"username": "alice", "age": 30});
        let value = decode(object.as_object().unwrap()).unwrap();
        let Params(user) = Params::<CreateUser>::from_value(ResolvedValue::Owned(value)).unwrap();
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn params_decode_failure_is_typed() {
        let ParamSlot::Params { decode, .. } = Params::<CreateUser>::slot() else {
            panic!("expected params slot");
        };
        let object = json!({"username": "alice", "age": "thirty"});
        let err = decode(object.as_object().unwrap()).err().unwrap();
        assert!(matches!(err, ResolveError::Decode { source_name: "params", .. }));
    }

    #[test]
    fn meta_slot_reads_meta() {
        assert!(matches!(Meta::<Pagination>::slot(), ParamSlot::Meta { .. }));
    }

    #[test]
    fn shared_values_are_cloned_out() {
        let shared: SharedValue = Arc::new(String::from("svc"));
        let Inject(first) =
            Inject::<String>::from_value(ResolvedValue::Shared(shared.clone())).unwrap();
        let Inject(second) = Inject::<String>::from_value(ResolvedValue::Shared(shared)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn wrong_type_is_a_mismatch() {
        let value: ParamValue = Box::new(42_u32);
        let err = Principal::from_value(ResolvedValue::Owned(value)).err().unwrap();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }

    #[test]
    fn param_types_compare_by_type_id() {
        assert_eq!(ParamType::of::<Principal>(), ParamType::of::<Principal>());
        assert_ne!(ParamType::of::<Principal>(), ParamType::of::<Identifier>());
    }
}
