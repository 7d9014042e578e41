//! Closed enumerations carried on the wire and in persisted rows
//!
//! Each enum has a stable `i32` tag (its wire form) and an upper-case name
//! (its persisted and logged form).

use serde::{Deserialize, Serialize};

macro_rules! wire_enum {
    (
        $(#[$attr:meta])*
        $name:ident {
            $($variant:ident = $tag:literal => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_i32(self) -> i32 {
                match self {
                    $($name::$variant => $tag,)+
                }
            }

            pub fn from_i32(tag: i32) -> Option<Self> {
                match tag {
                    $($tag => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Scalar kind held by a data element
    ValType {
        Int = 0 => "INT",
        Long = 1 => "LONG",
        Double = 2 => "DOUBLE",
        String = 3 => "STRING",
        Bytes = 4 => "BYTES",
    }
}

wire_enum! {
    /// Value lifecycle relative to what has been transmitted
    ValState {
        Clean = 0 => "CLEAN",
        Dirty = 1 => "DIRTY",
        Empty = 2 => "EMPTY",
    }
}

wire_enum! {
    ValClass {
        Data = 0 => "DATA",
        Event = 1 => "EVENT",
    }
}

wire_enum! {
    ValSemantic {
        Default = 0 => "DEFAULT",
        TimeStart = 1 => "TIME_START",
        TimeStop = 2 => "TIME_STOP",
        TimeStamp = 3 => "TIME_STAMP",
        TimeSpan = 4 => "TIME_SPAN",
        Sample = 5 => "SAMPLE",
        Counter = 6 => "COUNTER",
        Log = 7 => "LOG",
    }
}

wire_enum! {
    ValFreq {
        Default = 0 => "DEFAULT",
        Rare = 1 => "RARE",
        Common = 2 => "COMMON",
        Continuous = 3 => "CONTINUOUS",
        Irregular = 4 => "IRREGULAR",
    }
}

wire_enum! {
    ValPattern {
        Default = 0 => "DEFAULT",
        Static = 1 => "STATIC",
        Rising = 2 => "RISING",
        Plateau = 3 => "PLATEAU",
        Oscillating = 4 => "OSCILLATING",
        Arc = 5 => "ARC",
    }
}

wire_enum! {
    ValCompare {
        SelfValue = 0 => "SELF",
        Relations = 1 => "RELATIONS",
    }
}

wire_enum! {
    Priority {
        Default = 0 => "DEFAULT",
        Low = 1 => "LOW",
        Immediate = 2 => "IMMEDIATE",
    }
}

wire_enum! {
    Scope {
        Default = 0 => "DEFAULT",
        SelfScope = 1 => "SELF",
        Node = 2 => "NODE",
        Aggregator = 3 => "AGGREGATOR",
        Global = 4 => "GLOBAL",
    }
}

wire_enum! {
    /// Software layer a pub reports on
    Layer {
        Default = 0 => "DEFAULT",
        App = 1 => "APP",
        Os = 2 => "OS",
        Lib = 3 => "LIB",
        Environment = 4 => "ENVIRONMENT",
        SosRuntime = 5 => "SOS_RUNTIME",
    }
}

wire_enum! {
    /// What kind of activity a pub describes
    Nature {
        Default = 0 => "DEFAULT",
        CreateInput = 1 => "CREATE_INPUT",
        CreateOutput = 2 => "CREATE_OUTPUT",
        CreateViz = 3 => "CREATE_VIZ",
        ExecWork = 4 => "EXEC_WORK",
        Buffer = 5 => "BUFFER",
        SupportExec = 6 => "SUPPORT_EXEC",
        SupportFlow = 7 => "SUPPORT_FLOW",
        ControlFlow = 8 => "CONTROL_FLOW",
        Kmean2d = 9 => "KMEAN_2D",
        Sos = 10 => "SOS",
    }
}

wire_enum! {
    Retain {
        Default = 0 => "DEFAULT",
        Session = 1 => "SESSION",
        Immediate = 2 => "IMMEDIATE",
    }
}

wire_enum! {
    /// Part a process plays in a deployment
    Role {
        Unassigned = 0 => "UNASSIGNED",
        Client = 1 => "CLIENT",
        Listener = 2 => "LISTENER",
        Aggregator = 3 => "AGGREGATOR",
        Analytics = 4 => "ANALYTICS",
        RuntimeUtility = 5 => "RUNTIME_UTILITY",
        OfflineTestMode = 6 => "OFFLINE_TEST_MODE",
    }
}

// Daemon lifecycle. A SHUTDOWN message moves straight to SHUTDOWN on
// receipt. A local stop (handle shutdown or a fatal error) is HALTING while
// the pipeline drains, and becomes SHUTDOWN once every stage has joined.
wire_enum! {
    Status {
        Init = 0 => "INIT",
        Running = 1 => "RUNNING",
        Halting = 2 => "HALTING",
        Shutdown = 3 => "SHUTDOWN",
    }
}

impl Role {
    /// Daemon roles treat GUID exhaustion as fatal; everyone else refills.
    pub fn is_daemon(self) -> bool {
        matches!(self, Role::Listener | Role::Aggregator)
    }
}
