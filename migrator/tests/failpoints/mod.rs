mod cutover_test;
mod throttler_test;
