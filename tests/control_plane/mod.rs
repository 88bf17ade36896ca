mod routing_sync_test;
mod scheduling_test;
