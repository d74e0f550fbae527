pub mod corpus;
pub mod windowing;
