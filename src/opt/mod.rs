mod dead_code_elimination;

pub use dead_code_elimination::DeadCodeElimination;
