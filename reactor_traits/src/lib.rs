pub mod clock;

pub use clock::{Clock, SystemClock};

/// Byte-level access to the serial line shared by the pump chain.
///
/// `read` returns whatever arrived before the line went idle, capped at `max`
/// bytes. An empty buffer means nothing was sent back in time, which callers
/// treat as "no reply" rather than an error.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn read(&mut self, max: usize) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).write(bytes)
    }
    fn read(&mut self, max: usize) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read(max)
    }
    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).close()
    }
}
