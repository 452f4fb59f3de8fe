pub mod composer;
pub mod correlation;
pub mod window;

pub use composer::ReportComposer;
