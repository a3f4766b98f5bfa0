//! Pre-dispatch connection filter.

use tokio::net::TcpStream;

/// Decides whether an accepted socket is kept. Returning `false` closes the
/// connection before any bytes are read.
pub trait ConnFilter: Send + Sync {
    fn keep_connection(&self, conn: &TcpStream) -> bool;
}

/// Adapter turning a closure into a [`ConnFilter`].
pub struct ConnFilterFn<F>(pub F);

impl<F> ConnFilter for ConnFilterFn<F>
where
    F: Fn(&TcpStream) -> bool + Send + Sync,
{
    fn keep_connection(&self, conn: &TcpStream) -> bool {
        (self.0)(conn)
    }
}
