pub mod dispatcher;
pub mod event;
pub mod module;
pub mod persistent_task;
pub mod proxy;
pub mod scoped_thread_lock;
