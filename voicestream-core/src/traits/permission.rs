/// Answers whether the application may record audio.
///
/// Consulted by `CaptureSession::start()` before any device is touched.
/// Prompting the user is outside this crate; the provider only reports the
/// current answer.
pub trait PermissionProvider: Send + Sync {
    fn is_granted(&self) -> bool;
}

impl<F> PermissionProvider for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_granted(&self) -> bool {
        self()
    }
}
