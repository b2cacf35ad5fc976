pub mod kafkas;
