mod queue;
mod timer;
