mod execute_tests;
mod helpers;
