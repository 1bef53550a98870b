mod process_test;
mod cluster_test;
mod session_test;
