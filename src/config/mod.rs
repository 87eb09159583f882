pub mod params;
pub mod settings;
pub mod step;
pub mod test_case;
pub mod vocab;

pub use params::{ParamDef, Params};
pub use settings::{EngineSettings, StabilitySettings};
pub use step::{ActionKind, ElementIndex, Step};
pub use test_case::{BrowserSettings, Credentials, TestCase, TestStatus, Viewport};
pub use vocab::Vocabulary;
