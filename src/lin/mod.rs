mod check;
pub use check::check_linearization;

pub(crate) mod hints;
pub(crate) mod plan;
