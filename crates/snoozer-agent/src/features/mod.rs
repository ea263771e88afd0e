pub mod status_reporting;
