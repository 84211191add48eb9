pub mod bulk_run;
pub mod mot_refresh;
