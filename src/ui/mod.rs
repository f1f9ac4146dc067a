pub mod components;
pub mod pane;

pub use components::{
    render_delete_confirm, render_help_bar, render_popup,
    render_progress_bar, render_status_bar,
};
pub use pane::Pane;
