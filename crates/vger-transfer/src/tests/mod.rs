mod format;
mod upgrade;
