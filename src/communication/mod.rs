pub mod dispatch_channel;
