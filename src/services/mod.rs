mod pollerservice;

pub mod deliveryworker;

pub use pollerservice::PollerService;
