pub mod install_image;
pub mod list_policies;
pub mod run;
