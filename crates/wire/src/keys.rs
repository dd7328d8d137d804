// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Well-known dictionary keys and response strings of the control protocol.

/// Environment variable carrying the trusted descriptor number to children.
pub const TRUSTED_FD_ENV: &str = "WARDEN_TRUSTED_FD";

/// Label of the designated helper daemon, pausable via batch control.
pub const HELPER_LABEL: &str = "warden-helper";

// Job descriptor keys
pub const LABEL: &str = "Label";
pub const PROGRAM: &str = "Program";
pub const PROGRAM_ARGUMENTS: &str = "ProgramArguments";
pub const ENVIRONMENT_VARIABLES: &str = "EnvironmentVariables";
pub const SOFT_RESOURCE_LIMITS: &str = "SoftResourceLimits";
pub const HARD_RESOURCE_LIMITS: &str = "HardResourceLimits";
pub const USER_NAME: &str = "UserName";
pub const UID: &str = "UID";
pub const GID: &str = "GID";
pub const ROOT_DIRECTORY: &str = "RootDirectory";
pub const WORKING_DIRECTORY: &str = "WorkingDirectory";
pub const UMASK: &str = "Umask";
pub const STANDARD_OUT_PATH: &str = "StandardOutPath";
pub const STANDARD_ERROR_PATH: &str = "StandardErrorPath";
pub const INETD_COMPATIBILITY: &str = "inetdCompatibility";
pub const ON_DEMAND: &str = "OnDemand";
pub const SERVICE_IPC: &str = "ServiceIPC";
pub const INIT_GROUPS: &str = "InitGroups";
pub const LOW_PRIORITY_IO: &str = "LowPriorityIO";
pub const NICE: &str = "Nice";
pub const SOCKETS: &str = "Sockets";
pub const DEMAND_PORTS: &str = "DemandPorts";

// Resource limit keys (soft/hard limit dictionaries)
pub const LIMIT_CORE: &str = "Core";
pub const LIMIT_CPU: &str = "CPU";
pub const LIMIT_DATA: &str = "Data";
pub const LIMIT_FSIZE: &str = "FileSize";
pub const LIMIT_MEMLOCK: &str = "MemoryLock";
pub const LIMIT_NOFILE: &str = "NumberOfFiles";
pub const LIMIT_NPROC: &str = "NumberOfProcesses";
pub const LIMIT_RSS: &str = "ResidentSetSize";
pub const LIMIT_STACK: &str = "Stack";

// Request keys
pub const START_JOB: &str = "StartJob";
pub const STOP_JOB: &str = "StopJob";
pub const REMOVE_JOB: &str = "RemoveJob";
pub const SUBMIT_JOB: &str = "SubmitJob";
pub const SET_USER_ENVIRONMENT: &str = "SetUserEnvironment";
pub const UNSET_USER_ENVIRONMENT: &str = "UnsetUserEnvironment";
pub const GET_USER_ENVIRONMENT: &str = "GetUserEnvironment";
pub const CHECK_IN: &str = "CheckIn";
pub const RELOAD_TTYS: &str = "ReloadTTYs";
pub const SHUTDOWN: &str = "Shutdown";
pub const GET_JOBS: &str = "GetJobs";
pub const GET_JOB: &str = "GetJob";
pub const GET_JOB_WITH_HANDLES: &str = "GetJobWithHandles";
pub const SET_UMASK: &str = "SetUmask";
pub const GET_UMASK: &str = "GetUmask";
pub const SET_STANDARD_OUT: &str = "SetStandardOut";
pub const SET_STANDARD_ERROR: &str = "SetStandardError";
pub const BATCH_CONTROL: &str = "BatchControl";
pub const BATCH_QUERY: &str = "BatchQuery";
pub const GET_RESOURCE_LIMITS: &str = "GetResourceLimits";
pub const SET_RESOURCE_LIMITS: &str = "SetResourceLimits";

// Response strings
pub const RESPONSE_SUCCESS: &str = "Success";
pub const RESPONSE_JOB_NOT_FOUND: &str = "JobNotFound";
pub const RESPONSE_JOB_EXISTS: &str = "JobExists";
pub const RESPONSE_LABEL_MISSING: &str = "LabelMissing";
pub const RESPONSE_PROGRAM_ARGUMENTS_MISSING: &str = "ProgramArgumentsMissing";
pub const RESPONSE_NOT_RUNNING_FROM_WARDEN: &str = "NotRunningFromWarden";
pub const RESPONSE_UNKNOWN_COMMAND: &str = "UnknownCommand";
