/// Error code registry for statespace
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Reference errors
/// - 3000-3999: Shape mismatch errors
/// - 4000-4999: Order errors
/// - 5000-5999: Structure errors
/// - 6000-6999: Input errors
#[allow(dead_code)]
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_FOREIGN_FIELD: u16 = 1001;
    pub const CONFIG_MIXED_SPLITTER: u16 = 1002;
    pub const CONFIG_COMBINER_NOT_IN_SPLITTER: u16 = 1003;
    pub const CONFIG_ALREADY_SET: u16 = 1004;
    pub const CONFIG_EMPTY_UPSTREAM: u16 = 1005;
    pub const CONFIG_DUPLICATE_UPSTREAM: u16 = 1006;
    pub const CONFIG_INVALID_NAME: u16 = 1007;
    pub const CONFIG_PLAN_GRAPH: u16 = 1008;
    pub const CONFIG_INNER_INPUT_ZIP: u16 = 1009;

    // Reference errors (2000-2999)
    pub const REFERENCE_GENERIC: u16 = 2000;
    pub const REFERENCE_UNCONNECTED: u16 = 2001;

    // Shape mismatch errors (3000-3999)
    pub const SHAPE_GENERIC: u16 = 3000;
    pub const SHAPE_ZIP_LENGTH: u16 = 3001;
    pub const SHAPE_ZIP_GROUPS: u16 = 3002;
    pub const SHAPE_RAGGED_OUTER: u16 = 3003;

    // Order errors (4000-4999)
    pub const ORDER_GENERIC: u16 = 4000;
    pub const ORDER_COMBINE_INNER_FIRST: u16 = 4001;

    // Structure errors (5000-5999)
    pub const STRUCTURE_GENERIC: u16 = 5000;
    pub const STRUCTURE_OPERATOR_ARITY: u16 = 5001;
    pub const STRUCTURE_DANGLING_OPERANDS: u16 = 5002;
    pub const STRUCTURE_PARSE: u16 = 5003;
    pub const STRUCTURE_PRODUCT_ARITY: u16 = 5004;

    // Input errors (6000-6999)
    pub const INPUT_GENERIC: u16 = 6000;
    pub const INPUT_MISSING: u16 = 6001;
    pub const INPUT_NOT_ARRAY: u16 = 6002;
    pub const INPUT_NOT_RAGGED: u16 = 6003;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        // Configuration errors
        1000 => "Generic configuration error",
        1001 => "Splitter field is qualified with another node's name",
        1002 => "Splitter mixes upstream and local fields",
        1003 => "Combiner field is not part of the splitter",
        1004 => "Node attribute was set more than once",
        1005 => "Upstream node has no splitter to import",
        1006 => "Upstream node is connected more than once",
        1007 => "Invalid node or field name",
        1008 => "Plan nodes are duplicated, unknown or cyclic",
        1009 => "Upstream feeding an inner input is not a product term of the splitter",

        // Reference errors
        2000 => "Generic reference error",
        2001 => "Escape marker names a node that is not connected",

        // Shape mismatch errors
        3000 => "Generic shape mismatch",
        3001 => "Zipped fields have different lengths",
        3002 => "Zipped splitters have different group structure",
        3003 => "Ragged input does not match its upstream states",

        // Order errors
        4000 => "Generic order error",
        4001 => "Inner or dependent fields must be combined first",

        // Structure errors
        5000 => "Generic structure error",
        5001 => "Operator is missing operands",
        5002 => "Program leaves more than one result",
        5003 => "Splitter text could not be parsed",
        5004 => "Product needs at least two children",

        // Input errors
        6000 => "Generic input error",
        6001 => "Split field has no value",
        6002 => "Split field value is not an array",
        6003 => "Inner input value is not a list of lists",

        _ => "Unknown error code",
    }
}
