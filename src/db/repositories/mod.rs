mod logs;
mod schedules;
