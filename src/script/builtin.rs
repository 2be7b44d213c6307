//! Scripts every [`ScriptRegistry`](super::ScriptRegistry) built with
//! `with_builtins` carries.
//!
//! | name         | KEYS              | ARGV          | reply                                  |
//! |--------------|-------------------|---------------|----------------------------------------|
//! | `move2set`   | keys to convert   | `s` or `z`    | `[keys inspected, keys converted]`     |
//! | `delpattern` | none              | glob pattern  | number of keys deleted                 |
//! | `zpop`       | sorted set        | count (opt.)  | members removed, lowest score first    |

use super::registry::ScriptDefinition;

/// Name of the pattern-delete script used by managers to flush a model.
pub const DELPATTERN: &str = "delpattern";

/// Name of the list/set to set/sorted-set conversion script.
pub const MOVE2SET: &str = "move2set";

/// Name of the sorted-set pop script.
pub const ZPOP: &str = "zpop";

/// Helpers prepended to every builtin.
const PRELUDE: &str = r#"
local function key_type(key)
    return redis.call('type', key)['ok']
end

local function keys_matching(pattern)
    return redis.call('keys', pattern)
end
"#;

const MOVE2SET_BODY: &str = r#"
local target = ARGV[1]
if target ~= 's' and target ~= 'z' then
    return redis.error_reply('ERR move2set target must be s or z')
end
local converted = 0
for _, key in ipairs(KEYS) do
    local current = key_type(key)
    if current == 'list' or (target == 'z' and current == 'set') then
        local members
        if current == 'list' then
            members = redis.call('lrange', key, 0, -1)
        else
            members = redis.call('smembers', key)
        end
        redis.call('del', key)
        for position, member in ipairs(members) do
            if target == 'z' then
                redis.call('zadd', key, position, member)
            else
                redis.call('sadd', key, member)
            end
        end
        converted = converted + 1
    end
end
return {#KEYS, converted}
"#;

const DELPATTERN_BODY: &str = r#"
local removed = 0
for _, key in ipairs(keys_matching(ARGV[1])) do
    removed = removed + redis.call('del', key)
end
return removed
"#;

const ZPOP_BODY: &str = r#"
local count = tonumber(ARGV[1] or '1')
if count == nil then
    return redis.error_reply('ERR zpop count is not a number')
end
if count <= 0 then
    return {}
end
local members = redis.call('zrange', KEYS[1], 0, count - 1)
if #members > 0 then
    redis.call('zrem', KEYS[1], table.unpack(members))
end
return members
"#;

/// The builtin script definitions.
pub fn definitions() -> Vec<ScriptDefinition> {
    vec![
        ScriptDefinition::new(MOVE2SET, [PRELUDE, MOVE2SET_BODY]),
        ScriptDefinition::new(DELPATTERN, [PRELUDE, DELPATTERN_BODY]),
        ScriptDefinition::new(ZPOP, [PRELUDE, ZPOP_BODY]),
    ]
}
