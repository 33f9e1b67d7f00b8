pub mod apply;
pub mod plan;
pub mod run;
pub mod state;
pub mod validate;
