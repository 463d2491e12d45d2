pub mod balanced;
pub mod strict;

pub use balanced::BalancedProvider;
pub use strict::StrictProvider;
