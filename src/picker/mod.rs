// Folder picker - asks the user for a new library root

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Picked(String),
    Cancelled,
    /// Another pick is already open.
    InProgress,
}

#[derive(Debug, Error)]
pub enum PickerError {
    #[error("no folder picker available on this build")]
    Unavailable,
    #[error("folder picker failed: {0}")]
    Failed(String),
}

pub trait FolderPicker: Send + Sync {
    fn pick_directory(&self) -> BoxFuture<'_, Result<PickOutcome, PickerError>>;
}

/// Used when the native dialog is compiled out; the manual path entry still works.
#[derive(Debug, Default)]
pub struct NoPicker;

impl FolderPicker for NoPicker {
    fn pick_directory(&self) -> BoxFuture<'_, Result<PickOutcome, PickerError>> {
        async { Err(PickerError::Unavailable) }.boxed()
    }
}

#[cfg(feature = "picker")]
pub use dialog::DialogPicker;

#[cfg(feature = "picker")]
mod dialog {
    use super::{FolderPicker, PickOutcome, PickerError};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use rfd::FileDialog;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tracing::info;

    /// Native folder dialog. Only one can be open at a time.
    #[derive(Debug, Default)]
    pub struct DialogPicker {
        open: Arc<AtomicBool>,
    }

    impl DialogPicker {
        pub fn new() -> Self {
            Self::default()
        }
    }

    struct OpenFlag(Arc<AtomicBool>);

    impl Drop for OpenFlag {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    impl FolderPicker for DialogPicker {
        fn pick_directory(&self) -> BoxFuture<'_, Result<PickOutcome, PickerError>> {
            let open = Arc::clone(&self.open);
            async move {
                if open.swap(true, Ordering::SeqCst) {
                    return Ok(PickOutcome::InProgress);
                }
                let flag = OpenFlag(open);

                // the dialog blocks until closed
                let picked = tokio::task::spawn_blocking(|| {
                    FileDialog::new()
                        .set_title("Choose a library folder")
                        .pick_folder()
                })
                .await
                .map_err(|e| PickerError::Failed(e.to_string()))?;
                drop(flag);

                Ok(match picked {
                    Some(path) => {
                        info!(path = %path.display(), "Folder picked");
                        PickOutcome::Picked(path.to_string_lossy().into_owned())
                    }
                    None => PickOutcome::Cancelled,
                })
            }
            .boxed()
        }
    }
}
