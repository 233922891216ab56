mod critical_section_test;
mod cutover_test;
mod migration_config_test;
mod postpone_test;
mod throttle_test;
