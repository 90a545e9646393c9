pub mod window;
pub mod adaptive;
