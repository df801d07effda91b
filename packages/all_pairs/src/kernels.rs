//! The built-in measurement kernels.
//!
//! | name          | initiator                                     | partner                      |
//! |---------------|-----------------------------------------------|------------------------------|
//! | `def`         | flag ping-pong through the remote windows     | echoes each flag             |
//! | `mpi_rma_get` | lock, get one cell of the partner, unlock     | nothing (passive target)     |
//! | `mpi_rma_put` | lock, put one cell into the partner, unlock   | nothing (passive target)     |
//! | `mpi_sync`    | synchronous send and receive ping-pong        | receive and synchronous send |
//! | `mpi_async`   | buffered send and receive ping-pong           | receive and buffered send    |
//! | `dash_get`    | read the partner's first global array element | nothing                      |

mod flag_exchange;
mod global_get;
mod message_exchange;
mod rma;

pub use flag_exchange::*;
pub use global_get::*;
pub use message_exchange::*;
pub use rma::*;
