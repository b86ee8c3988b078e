pub mod credentials;
pub mod request;
pub mod response;
pub mod result_code;
pub mod session;

pub use credentials::*;
pub use request::*;
pub use response::*;
pub use result_code::*;
pub use session::*;
