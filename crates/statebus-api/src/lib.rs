// statebus-api: Wire types, target transports and message-bus clients for the state collector

pub mod bus;
pub mod error;
pub mod notification;
pub mod path;
pub mod rpc;
pub mod subject;
pub mod transport;
pub mod value;

pub use error::Error;
pub use notification::{Notification, SubscribeRequest, SubscribeResponse, Update};
pub use path::{Path, PathElem};
pub use value::TypedValue;
