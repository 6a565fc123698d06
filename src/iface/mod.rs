/*! Network interface logic.

The `iface` module deals with the *network interfaces*. It filters incoming frames,
provides lookup and caching of hardware addresses, and handles management packets.
*/

mod interface;
mod neighbor;
mod socket_meta;
mod socket_set;

pub use self::interface::{Config, Interface, InterfaceInner as Context};
pub use self::neighbor::{Cache as NeighborCache, Neighbor, CACHE_SIZE};
pub use self::socket_set::{SocketHandle, SocketSet, SocketStorage};
