pub mod assignment;
pub mod courier;
pub mod delivery;
pub mod earnings;
pub mod order;
pub mod tracking;
